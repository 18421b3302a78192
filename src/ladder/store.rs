// =============================================================================
// LadderStore — the validated, file-backed ladder of price levels (§4.2)
// =============================================================================
//
// The three redundant CSV manager classes the original bot grew over time
// collapse into this one type. It owns exactly one ticker's ladder file and
// never holds more than one in memory at a time.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::LadderStoreError;
use crate::ladder::line::{LadderLine, REQUIRED_COLUMNS};
use crate::types::Side;

/// The minimum notional, in dollars, that a single redistributed share
/// quantum must represent. Mirrors the original ladder construction tool's
/// `dollar_amount_min`.
const MIN_LINE_NOTIONAL: Decimal = dec!(2);

/// How close a line's sell price must sit to the next line's buy price to
/// be considered "locked" for chase purposes (§9 open question: epsilon,
/// not exact equality, since ladder prices are already rounded to 2dp).
const LOCK_EPSILON: Decimal = dec!(0.01);

/// Tolerance band around the construction-time spread (0.5%) a chased
/// line's own spread must stay within, or the chase aborts rather than
/// risk compounding a corrupted file.
const SPREAD_TOLERANCE: Decimal = dec!(0.004);

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Distinguishes a non-numeric value in a known numeric column from every
/// other CSV deserialize failure, so the former gets its own error variant
/// instead of a generic parse error (§4.2).
fn classify_parse_error(path: &Path, headers: &[String], source: csv::Error) -> LadderStoreError {
    if let csv::ErrorKind::Deserialize { ref err, .. } = *source.kind() {
        if let Some(field) = err.field() {
            let column = headers
                .get(field as usize)
                .and_then(|header| REQUIRED_COLUMNS.iter().find(|c| **c == header.as_str()).copied());
            if let Some(column) = column {
                let index = source.position().map(|p| p.record() as i64).unwrap_or(-1);
                return LadderStoreError::InvalidNumber {
                    index,
                    column,
                    value: err.to_string(),
                };
            }
        }
    }
    LadderStoreError::Parse {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Debug)]
pub struct LadderStore {
    path: PathBuf,
    lines: Vec<LadderLine>,
}

impl LadderStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LadderStoreError> {
        let path = path.into();
        if !path.exists() {
            return Err(LadderStoreError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|source| LadderStoreError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let headers: Vec<String> = {
            let headers = reader.headers().map_err(|source| LadderStoreError::Parse {
                path: path.display().to_string(),
                source,
            })?;
            for column in REQUIRED_COLUMNS {
                if !headers.iter().any(|h| h == *column) {
                    return Err(LadderStoreError::MissingColumn {
                        path: path.display().to_string(),
                        column,
                    });
                }
            }
            headers.iter().map(|h| h.to_string()).collect()
        };

        let mut lines = Vec::new();
        for record in reader.deserialize::<LadderLine>() {
            let line = record.map_err(|source| classify_parse_error(&path, &headers, source))?;
            lines.push(line);
        }
        lines.sort_by_key(|l| l.index);

        Ok(Self { path, lines })
    }

    /// Atomic write: serialize to a sibling `.tmp` file, then rename over
    /// the real path. Mirrors the teacher's `RuntimeConfig::save` pattern
    /// so a crash mid-write never leaves a half-written ladder behind.
    pub fn save(&self) -> Result<(), LadderStoreError> {
        let tmp_path = PathBuf::from(format!("{}.tmp", self.path.display()));
        {
            let mut writer =
                csv::Writer::from_path(&tmp_path).map_err(|source| LadderStoreError::Parse {
                    path: tmp_path.display().to_string(),
                    source,
                })?;
            for line in &self.lines {
                writer
                    .serialize(line)
                    .map_err(|source| LadderStoreError::Parse {
                        path: tmp_path.display().to_string(),
                        source,
                    })?;
            }
            writer.flush().map_err(|source| LadderStoreError::Io {
                path: tmp_path.display().to_string(),
                source,
            })?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|source| LadderStoreError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[LadderLine] {
        &self.lines
    }

    pub fn get_row_by_index(&self, index: i64) -> Result<&LadderLine, LadderStoreError> {
        self.lines
            .iter()
            .find(|l| l.index == index)
            .ok_or(LadderStoreError::RowNotFound(index))
    }

    fn get_row_by_index_mut(&mut self, index: i64) -> Result<&mut LadderLine, LadderStoreError> {
        self.lines
            .iter_mut()
            .find(|l| l.index == index)
            .ok_or(LadderStoreError::RowNotFound(index))
    }

    /// Lines eligible to receive more of a BUY at `price`: the line's buy
    /// price is at or above `price` and it still has unfilled capacity.
    pub fn get_rows_for_buy(&self, price: Decimal) -> Vec<&LadderLine> {
        self.lines
            .iter()
            .filter(|l| l.buy_price >= price && l.held_shares < l.target_shares)
            .collect()
    }

    /// Lines eligible to sell at `price`: the line's sell price is at or
    /// below `price` and it is currently holding shares.
    pub fn get_rows_for_sell(&self, price: Decimal) -> Vec<&LadderLine> {
        self.lines
            .iter()
            .filter(|l| l.sell_price <= price && l.held_shares > dec!(0))
            .collect()
    }

    pub fn get_current_held_shares(&self) -> Decimal {
        self.lines.iter().map(|l| l.held_shares).sum()
    }

    /// The one `(index, order_id)` pair currently pending, if any.
    pub fn get_pending_order_info(&self) -> Option<(i64, String)> {
        self.lines
            .iter()
            .find_map(|l| l.pending_order_id.clone().map(|id| (l.index, id)))
    }

    /// Total dollars currently allocated across the ladder, at each line's
    /// own buy price.
    pub fn get_total_cash_value(&self) -> Decimal {
        self.lines.iter().map(|l| l.buy_price * l.target_shares).sum()
    }

    pub fn set_pending_order(&mut self, index: i64, order_id: String) -> Result<(), LadderStoreError> {
        let line = self.get_row_by_index_mut(index)?;
        line.pending_order_id = Some(order_id);
        line.last_action = now_epoch();
        self.save()
    }

    pub fn clear_pending_order(&mut self, index: i64) -> Result<(), LadderStoreError> {
        let line = self.get_row_by_index_mut(index)?;
        line.clear_pending_order();
        self.save()
    }

    /// Whether the ladder is eligible to chase `price` upward: nothing is
    /// held or pending anywhere in the ladder, and price has cleared the
    /// top line's buy price by more than a cent.
    pub fn is_chasable(&self, price: Decimal) -> bool {
        let Some(top) = self.lines.first() else {
            return false;
        };
        if self.lines.iter().any(|l| l.has_pending_order()) {
            return false;
        }
        top.held_shares == dec!(0) && price > top.buy_price + dec!(0.01)
    }

    /// Reconciles a fill into the ladder.
    ///
    /// BUY fills distribute top-down, starting at index 0 through and
    /// including `index` (the anchor line the pending order was placed
    /// against). SELL fills distribute bottom-up, from the last line
    /// through and including `index`. A single forward pass over the
    /// affected range is sufficient — unlike the original's `while`-wrapped
    /// loop, nothing is gained by revisiting a range whose capacity is
    /// already exhausted, so there is no risk of looping forever on a fill
    /// that doesn't evenly divide.
    pub fn update_order_status(
        &mut self,
        index: i64,
        filled_qty: Decimal,
        filled_avg_price: Decimal,
        side: Side,
    ) -> Result<(), LadderStoreError> {
        let anchor_pos = self
            .lines
            .iter()
            .position(|l| l.index == index)
            .ok_or(LadderStoreError::RowNotFound(index))?;

        let mut remaining = filled_qty;
        let now = now_epoch();

        match side {
            Side::Buy => {
                for line in self.lines[..=anchor_pos].iter_mut() {
                    if remaining <= dec!(0) {
                        break;
                    }
                    let capacity = line.target_shares - line.held_shares;
                    if capacity <= dec!(0) {
                        continue;
                    }
                    let assigned = remaining.min(capacity);
                    line.held_shares += assigned;
                    line.unrealized_profit += (line.buy_price - filled_avg_price) * assigned;
                    line.last_action = now;
                    remaining -= assigned;
                }
            }
            Side::Sell => {
                for line in self.lines[anchor_pos..].iter_mut().rev() {
                    if remaining <= dec!(0) {
                        break;
                    }
                    let capacity = line.held_shares;
                    if capacity <= dec!(0) {
                        continue;
                    }
                    let assigned = remaining.min(capacity);
                    let sale_profit = (filled_avg_price - line.buy_price) * assigned;
                    line.profit += sale_profit + line.unrealized_profit;
                    line.unrealized_profit = dec!(0);
                    line.held_shares -= assigned;
                    line.last_action = now;
                    remaining -= assigned;
                }
            }
        }

        self.lines[anchor_pos].clear_pending_order();
        self.save()
    }

    /// Shifts or prepends the top line when price has run away above the
    /// ladder (§4.2). Returns `Ok(false)` when the ladder isn't eligible
    /// to chase or the top line's spread looks corrupted; `Ok(true)` once
    /// the chase and subsequent redistribution have both completed.
    pub fn chase_price(&mut self, price: Decimal) -> Result<bool, LadderStoreError> {
        if !self.is_chasable(price) {
            return Ok(false);
        }

        let total_cash = self.get_total_cash_value();
        let first = self.lines[0].clone();

        let spread = (first.sell_price - first.buy_price) / first.buy_price;
        if (spread - dec!(0.005)).abs() > SPREAD_TOLERANCE {
            tracing::warn!(
                buy_price = %first.buy_price,
                sell_price = %first.sell_price,
                %spread,
                "top line spread looks corrupted, refusing to chase"
            );
            return Ok(false);
        }

        let locked = self
            .lines
            .get(1)
            .map(|second| (second.sell_price - first.buy_price).abs() <= LOCK_EPSILON)
            .unwrap_or(false);

        let new_buy = first.buy_price + dec!(0.01);
        let new_sell = round2(new_buy * dec!(1.005));

        if locked {
            let top = &mut self.lines[0];
            top.buy_price = new_buy;
            top.sell_price = new_sell;
            top.last_action = now_epoch();
        } else {
            let new_line = LadderLine {
                index: 0,
                buy_price: new_buy,
                sell_price: new_sell,
                target_shares: dec!(0),
                held_shares: dec!(0),
                pending_order_id: None,
                spc: String::new(),
                unrealized_profit: dec!(0),
                last_action: now_epoch(),
                profit: dec!(0),
            };
            for line in &mut self.lines {
                line.index += 1;
            }
            self.lines.insert(0, new_line);
        }

        self.even_redistribution(total_cash)
    }

    /// Spreads `total_cash` evenly across every line's `target_shares`.
    /// Refuses (returns `Ok(false)`, no write) if any line still holds
    /// shares — redistributing under a live position would silently move
    /// the goalposts for shares that are already bought.
    ///
    /// Each line's intended share count is clipped down to the nearest
    /// multiple of the share quantum worth `MIN_LINE_NOTIONAL` dollars at
    /// that line's price, so no line's last partial share represents less
    /// than $2 of notional; the clipped remainder carries forward as extra
    /// cash for the next line, and whatever is left after the last line
    /// lands on the last line itself, tagged `spc = "last"`.
    pub fn even_redistribution(&mut self, total_cash: Decimal) -> Result<bool, LadderStoreError> {
        if self.lines.is_empty() {
            return Ok(false);
        }
        if self.lines.iter().any(|l| l.held_shares > dec!(0)) {
            let offender = self.lines.iter().find(|l| l.held_shares > dec!(0)).unwrap();
            tracing::warn!(
                index = offender.index,
                held = %offender.held_shares,
                "refusing to redistribute cash while shares are held"
            );
            return Ok(false);
        }

        let num_lines = Decimal::from(self.lines.len() as i64);
        let cash_per_line = total_cash / num_lines;
        let mut extra_dollars = dec!(0);

        for line in self.lines.iter_mut() {
            let intended = (cash_per_line + extra_dollars) / line.buy_price;
            let quantum = MIN_LINE_NOTIONAL / line.buy_price;
            let steps = (intended / quantum).floor();
            let extra_shares = intended - steps * quantum;
            line.target_shares = intended - extra_shares;
            extra_dollars = extra_shares * line.buy_price;
        }

        if extra_dollars != dec!(0) {
            if let Some(last) = self.lines.last_mut() {
                last.target_shares += extra_dollars / last.buy_price;
                last.spc = "last".to_string();
            }
        }

        self.save()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn write_ladder(rows: &[LadderLine]) -> LadderStore {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        // Keep the handle alive for the duration of the test by leaking it
        // into the tempfile crate's own cleanup-on-drop path isn't needed
        // here since `LadderStore::save` replaces the file outright.
        std::mem::forget(file);

        let mut writer = csv::Writer::from_path(&path).unwrap();
        for row in rows {
            writer.serialize(row).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);

        LadderStore::load(path).unwrap()
    }

    fn line(index: i64, buy: Decimal, sell: Decimal, target: Decimal) -> LadderLine {
        LadderLine {
            index,
            buy_price: buy,
            sell_price: sell,
            target_shares: target,
            held_shares: dec!(0),
            pending_order_id: None,
            spc: String::new(),
            unrealized_profit: dec!(0),
            last_action: 0,
            profit: dec!(0),
        }
    }

    fn ladder_of(n: i64, top_buy: Decimal) -> LadderStore {
        let mut rows = Vec::new();
        let mut buy = top_buy;
        for i in 0..n {
            let sell = round2(buy * dec!(1.005));
            rows.push(line(i, buy, sell, dec!(1)));
            buy = round2(buy / dec!(1.005));
        }
        write_ladder(&rows)
    }

    #[test]
    fn scenario_1_buy_fill_sets_held_with_zero_unrealized() {
        let mut store = ladder_of(50, dec!(99.50));
        store
            .update_order_status(0, dec!(1), dec!(99.50), Side::Buy)
            .unwrap();

        let line0 = store.get_row_by_index(0).unwrap();
        assert_eq!(line0.held_shares, dec!(1));
        assert_eq!(line0.unrealized_profit, dec!(0));
        assert_eq!(line0.profit, dec!(0));
        assert_eq!(line0.pending_order_id, None);
    }

    #[test]
    fn scenario_3_sell_fill_realizes_profit_and_clears_unrealized() {
        let mut store = ladder_of(50, dec!(99.50));
        store
            .update_order_status(0, dec!(1), dec!(99.50), Side::Buy)
            .unwrap();
        store
            .update_order_status(0, dec!(1), dec!(100.00), Side::Sell)
            .unwrap();

        let line0 = store.get_row_by_index(0).unwrap();
        assert_eq!(line0.held_shares, dec!(0));
        assert_eq!(line0.profit, dec!(0.50));
        assert_eq!(line0.unrealized_profit, dec!(0));
    }

    #[test]
    fn scenario_4_partial_buy_fill_distributes_top_down_across_lines() {
        let rows = vec![
            line(0, dec!(100.00), dec!(100.50), dec!(6)),
            line(1, dec!(99.00), dec!(99.50), dec!(6)),
            line(2, dec!(98.00), dec!(98.50), dec!(6)),
            line(3, dec!(97.50), dec!(98.00), dec!(6)),
            line(4, dec!(97.20), dec!(97.70), dec!(6)),
            line(5, dec!(97.03), dec!(97.53), dec!(6)),
        ];
        let mut store = write_ladder(&rows);

        // 18 shares fill, anchor at index 5: distributes 6 to each of
        // lines 0..=2, leaving 3 and 4 untouched by this partial fill,
        // matching the top-down rule of reconciling against the anchor.
        store
            .update_order_status(5, dec!(18), dec!(97.03), Side::Buy)
            .unwrap();

        assert_eq!(store.get_row_by_index(0).unwrap().held_shares, dec!(6));
        assert_eq!(store.get_row_by_index(1).unwrap().held_shares, dec!(6));
        assert_eq!(store.get_row_by_index(2).unwrap().held_shares, dec!(6));
        assert_eq!(store.get_row_by_index(3).unwrap().held_shares, dec!(0));
        assert_eq!(store.get_row_by_index(4).unwrap().held_shares, dec!(0));

        let line2 = store.get_row_by_index(2).unwrap();
        assert_eq!(line2.unrealized_profit, (dec!(98.00) - dec!(97.03)) * dec!(6));
    }

    #[test]
    fn is_chasable_requires_no_held_shares_and_no_pending_orders_anywhere() {
        let store = ladder_of(3, dec!(99.50));
        assert!(store.is_chasable(dec!(100.00)));
        assert!(!store.is_chasable(dec!(99.50)));
    }

    #[test]
    fn scenario_6_chase_shifts_top_line_and_redistributes() {
        let mut store = ladder_of(10, dec!(99.50));
        let total_cash = store.get_total_cash_value();

        let chased = store.chase_price(dec!(100.00)).unwrap();
        assert!(chased);

        let new_top = store.get_row_by_index(0).unwrap();
        assert_eq!(new_top.buy_price, dec!(99.51));
        assert_eq!(new_top.sell_price, round2(dec!(99.51) * dec!(1.005)));

        // Redistribution recomputed target shares against the same total
        // cash that was allocated before the chase.
        let recomputed_total = store.get_total_cash_value();
        assert!((recomputed_total - total_cash).abs() < dec!(0.10));
    }

    #[test]
    fn chase_refuses_when_top_line_is_held() {
        let mut store = ladder_of(3, dec!(99.50));
        store
            .update_order_status(0, dec!(1), dec!(99.50), Side::Buy)
            .unwrap();
        assert!(!store.chase_price(dec!(100.00)).unwrap());
    }

    #[test]
    fn even_redistribution_refuses_when_shares_are_held() {
        let mut store = ladder_of(3, dec!(99.50));
        store
            .update_order_status(0, dec!(1), dec!(99.50), Side::Buy)
            .unwrap();

        let total_cash = store.get_total_cash_value();
        assert!(!store.even_redistribution(total_cash).unwrap());
    }

    #[test]
    fn even_redistribution_tags_last_line_and_conserves_quantized_remainder() {
        let rows = vec![
            line(0, dec!(100), dec!(100.50), dec!(0)),
            line(1, dec!(1000), dec!(1000.50), dec!(0)),
        ];
        let mut store = write_ladder(&rows);

        assert!(store.even_redistribution(dec!(103.2)).unwrap());

        let last = store.get_row_by_index(1).unwrap();
        assert_eq!(last.spc, "last");
    }

    #[test]
    fn load_reports_invalid_number_for_a_non_numeric_column() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        std::mem::forget(file);

        fs::write(
            &path,
            "index,buy_price,sell_price,target_shares,held_shares,pending_order_id,spc,unrealized_profit,last_action,profit\n\
             0,not-a-number,100.50,1,0,None,,0,0,0\n",
        )
        .unwrap();

        let err = LadderStore::load(&path).unwrap_err();
        match err {
            LadderStoreError::InvalidNumber { column, .. } => assert_eq!(column, "buy_price"),
            other => panic!("expected InvalidNumber, got {other:?}"),
        }
    }

    #[test]
    fn clip_quantum_matches_known_values() {
        // buy_price=100 => quantum=0.02, 0.516 => clip 0.016
        let quantum = MIN_LINE_NOTIONAL / dec!(100);
        let steps = (dec!(0.516) / quantum).floor();
        let clip = dec!(0.516) - steps * quantum;
        assert_eq!(clip, dec!(0.016));

        // buy_price=1000 => quantum=0.002, 0.516 is an exact multiple
        let quantum = MIN_LINE_NOTIONAL / dec!(1000);
        let steps = (dec!(0.516) / quantum).floor();
        let clip = dec!(0.516) - steps * quantum;
        assert_eq!(clip, dec!(0));
    }
}
