// =============================================================================
// LadderLine — a single price level in a ticker's ladder (§3)
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single row of the ladder CSV file.
///
/// Field order and names here are load-bearing: they are the exact CSV
/// header the ladder file round-trips through (§6). `pending_order_id`
/// uses the literal sentinel string `"None"` on the wire rather than an
/// empty cell, matching the format the construction wizard writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderLine {
    pub index: i64,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub target_shares: Decimal,
    pub held_shares: Decimal,
    #[serde(with = "pending_order_id_sentinel")]
    pub pending_order_id: Option<String>,
    pub spc: String,
    pub unrealized_profit: Decimal,
    pub last_action: i64,
    pub profit: Decimal,
}

/// The exact CSV column order the ladder file is written/read in.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "index",
    "buy_price",
    "sell_price",
    "target_shares",
    "held_shares",
    "pending_order_id",
    "spc",
    "unrealized_profit",
    "last_action",
    "profit",
];

impl LadderLine {
    pub fn has_pending_order(&self) -> bool {
        self.pending_order_id.is_some()
    }

    pub fn clear_pending_order(&mut self) {
        self.pending_order_id = None;
    }
}

/// `serde(with = ...)` helper that maps `None` <-> the literal string
/// `"None"` instead of serde's usual `Option` encoding, so the CSV cell
/// round-trips exactly as the construction wizard writes it.
mod pending_order_id_sentinel {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(id) => id.serialize(serializer),
            None => "None".serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw == "None" || raw.is_empty() {
            Ok(None)
        } else {
            Ok(Some(raw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(index: i64, buy: Decimal, sell: Decimal) -> LadderLine {
        LadderLine {
            index,
            buy_price: buy,
            sell_price: sell,
            target_shares: dec!(1),
            held_shares: dec!(0),
            pending_order_id: None,
            spc: "last".to_string(),
            unrealized_profit: dec!(0),
            last_action: 0,
            profit: dec!(0),
        }
    }

    #[test]
    fn pending_order_sentinel_round_trips_through_csv() {
        let mut row = line(0, dec!(99.50), dec!(100.00));
        row.pending_order_id = Some("abc-123".to_string());

        let mut wtr = csv::WriterBuilder::new().from_writer(vec![]);
        wtr.serialize(&row).unwrap();
        let csv_bytes = wtr.into_inner().unwrap();
        assert!(String::from_utf8_lossy(&csv_bytes).contains("abc-123"));

        let mut rdr = csv::ReaderBuilder::new().from_reader(csv_bytes.as_slice());
        let parsed: LadderLine = rdr.deserialize().next().unwrap().unwrap();
        assert_eq!(parsed.pending_order_id, Some("abc-123".to_string()));
    }

    #[test]
    fn absent_pending_order_round_trips_as_none_literal() {
        let row = line(1, dec!(99.00), dec!(99.50));

        let mut wtr = csv::WriterBuilder::new().from_writer(vec![]);
        wtr.serialize(&row).unwrap();
        let csv_bytes = wtr.into_inner().unwrap();
        assert!(String::from_utf8_lossy(&csv_bytes).contains("None"));

        let mut rdr = csv::ReaderBuilder::new().from_reader(csv_bytes.as_slice());
        let parsed: LadderLine = rdr.deserialize().next().unwrap().unwrap();
        assert_eq!(parsed.pending_order_id, None);
    }
}
