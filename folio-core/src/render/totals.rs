//! Financial totals, recomputed from the booking on every render.

use folio_model::{Booking, Discount, StallLine};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::RenderError;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineTotal {
    pub stall_number: String,
    pub area: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub lines: Vec<LineTotal>,
    pub base: Decimal,
    pub discount: Decimal,
    pub after_discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

pub fn compute_totals(booking: &Booking) -> Result<InvoiceTotals, RenderError> {
    let lines = booking
        .stalls
        .iter()
        .map(line_total)
        .collect::<Result<Vec<_>, _>>()?;

    let base = lines
        .iter()
        .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.amount))
        .ok_or_else(|| overflow("base amount"))?;

    let discount = match booking.discount {
        None => Decimal::ZERO,
        Some(Discount::Percentage(pct)) => percent_of(base, pct)
            .ok_or_else(|| overflow("discount"))?,
        // A fixed discount never takes the amount below zero.
        Some(Discount::Fixed(value)) => value.min(base).max(Decimal::ZERO),
    };

    let after_discount = base - discount;
    let tax = percent_of(after_discount, booking.tax_percent)
        .ok_or_else(|| overflow("tax"))?;
    let total = after_discount
        .checked_add(tax)
        .ok_or_else(|| overflow("total"))?;

    Ok(InvoiceTotals {
        lines,
        base,
        discount,
        after_discount,
        tax,
        total,
    })
}

fn line_total(stall: &StallLine) -> Result<LineTotal, RenderError> {
    let area = stall
        .width
        .checked_mul(stall.height)
        .ok_or_else(|| overflow("stall area"))?;
    let amount = area
        .checked_mul(stall.rate)
        .ok_or_else(|| overflow("stall amount"))?;
    Ok(LineTotal {
        stall_number: stall.stall_number.clone(),
        area,
        rate: stall.rate,
        amount,
    })
}

/// `amount * pct / 100`, rounded half away from zero to cents.
fn percent_of(amount: Decimal, pct: Decimal) -> Option<Decimal> {
    let raw = amount.checked_mul(pct)?.checked_div(HUNDRED)?;
    Some(raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

fn overflow(what: &str) -> RenderError {
    RenderError::SourceData(format!("{what} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_model::{BookingId, StallId};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn booking(discount: Option<Discount>, tax: &str) -> Booking {
        Booking {
            id: BookingId::new(),
            customer_name: "Acme Textiles".into(),
            stalls: vec![
                StallLine {
                    stall_id: StallId::new(),
                    stall_number: "A-1".into(),
                    width: dec("10"),
                    height: dec("20"),
                    rate: dec("30"),
                },
                StallLine {
                    stall_id: StallId::new(),
                    stall_number: "A-2".into(),
                    width: dec("4"),
                    height: dec("5"),
                    rate: dec("200"),
                },
            ],
            discount,
            tax_percent: dec(tax),
            updated_at: Utc::now(),
            exhibition: None,
        }
    }

    #[test]
    fn percentage_discount_then_tax() {
        let totals =
            compute_totals(&booking(Some(Discount::Percentage(dec("10"))), "18"))
                .unwrap();
        assert_eq!(totals.base, dec("10000"));
        assert_eq!(totals.discount, dec("1000.00"));
        assert_eq!(totals.after_discount, dec("9000.00"));
        assert_eq!(totals.tax, dec("1620.00"));
        assert_eq!(totals.total, dec("10620.00"));
        assert_eq!(totals.lines.len(), 2);
        assert_eq!(totals.lines[0].area, dec("200"));
    }

    #[test]
    fn fixed_discount_then_tax() {
        let totals =
            compute_totals(&booking(Some(Discount::Fixed(dec("500"))), "18"))
                .unwrap();
        assert_eq!(totals.after_discount, dec("9500"));
        assert_eq!(totals.tax, dec("1710.00"));
        assert_eq!(totals.total, dec("11210.00"));
    }

    #[test]
    fn fixed_discount_is_capped_at_base() {
        let totals =
            compute_totals(&booking(Some(Discount::Fixed(dec("25000"))), "18"))
                .unwrap();
        assert_eq!(totals.discount, dec("10000"));
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn percentages_round_half_away_from_zero() {
        let mut b = booking(Some(Discount::Percentage(dec("12.345"))), "0");
        b.stalls.truncate(1);
        b.stalls[0] = StallLine {
            rate: dec("1"),
            width: dec("1"),
            height: dec("1"),
            ..b.stalls[0].clone()
        };
        // 1 * 12.345 / 100 = 0.12345 -> 0.12
        let totals = compute_totals(&b).unwrap();
        assert_eq!(totals.discount, dec("0.12"));

        b.discount = Some(Discount::Percentage(dec("12.5")));
        b.stalls[0].rate = dec("0.1");
        // 0.1 * 12.5 / 100 = 0.0125 -> 0.01
        assert_eq!(compute_totals(&b).unwrap().discount, dec("0.01"));

        b.discount = None;
        b.tax_percent = dec("5");
        b.stalls[0].rate = dec("0.1");
        // 0.1 * 5 / 100 = 0.005 -> 0.01
        assert_eq!(compute_totals(&b).unwrap().tax, dec("0.01"));
    }

    #[test]
    fn empty_booking_totals_zero() {
        let mut b = booking(None, "18");
        b.stalls.clear();
        let totals = compute_totals(&b).unwrap();
        assert_eq!(totals.total, Decimal::ZERO);
        assert!(totals.lines.is_empty());
    }
}
