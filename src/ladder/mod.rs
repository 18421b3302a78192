// =============================================================================
// Ladder — per-ticker price-level ladder and its file-backed store (§3, §4.2)
// =============================================================================

mod line;
mod store;

pub use line::{LadderLine, REQUIRED_COLUMNS};
pub use store::LadderStore;
