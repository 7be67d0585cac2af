use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::ids::{BookingId, ExhibitionId, InvoiceId, StallId};

/// Lifecycle status of an invoice as recorded by the billing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discount configured on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", content = "value", rename_all = "snake_case")
)]
pub enum Discount {
    /// Percent of the base amount, e.g. `10` for 10%.
    Percentage(Decimal),
    /// Flat amount, capped at the base amount.
    Fixed(Decimal),
}

impl Discount {
    pub fn kind(&self) -> &'static str {
        match self {
            Discount::Percentage(_) => "percentage",
            Discount::Fixed(_) => "fixed",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            Discount::Percentage(v) | Discount::Fixed(v) => *v,
        }
    }
}

/// One booked stall. Its billed area is `width * height`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StallLine {
    pub stall_id: StallId,
    pub stall_number: String,
    pub width: Decimal,
    pub height: Decimal,
    /// Price per unit of area.
    pub rate: Decimal,
}

/// Grandparent of an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Exhibition {
    pub id: ExhibitionId,
    pub name: String,
    pub venue: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub logo_path: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

/// Parent of an invoice: the stalls, discount and tax being billed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Booking {
    pub id: BookingId,
    pub customer_name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub stalls: Vec<StallLine>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub discount: Option<Discount>,
    pub tax_percent: Decimal,
    pub updated_at: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub exhibition: Option<Exhibition>,
}

/// The document being rendered, with its relationship chain attached.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    /// Total as last persisted by the billing side. Never trusted for
    /// rendering; totals are recomputed from the booking.
    pub amount: Decimal,
    pub issued_on: NaiveDate,
    pub updated_at: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub booking: Option<Booking>,
}

impl Invoice {
    pub fn exhibition(&self) -> Option<&Exhibition> {
        self.booking.as_ref().and_then(|b| b.exhibition.as_ref())
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn discount_serializes_with_type_tag() {
        let json =
            serde_json::to_value(Discount::Percentage(Decimal::new(10, 0)))
                .unwrap();
        assert_eq!(json["type"], "percentage");
    }

    #[test]
    fn invoice_without_booking_deserializes() {
        let raw = r#"{
            "id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "invoice_number": "INV-1",
            "status": "issued",
            "amount": "100.00",
            "issued_on": "2026-01-05",
            "updated_at": "2026-01-05T10:00:00Z"
        }"#;
        let invoice: Invoice = serde_json::from_str(raw).unwrap();
        assert!(invoice.booking.is_none());
        assert!(invoice.exhibition().is_none());
        assert_eq!(invoice.status, InvoiceStatus::Issued);
    }
}
