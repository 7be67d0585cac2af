//! Record shapes shared across folio crates.
//!
//! These are the views of externally owned domain records that the render
//! cache reads. Nothing in this crate talks to storage; callers fetch the
//! records and hand a fully assembled [`Invoice`] to the cache.
#![allow(missing_docs)]

pub use ::chrono;
pub use ::rust_decimal;

pub mod ids;
pub mod records;

pub use ids::{BookingId, ExhibitionId, InvoiceId, StallId};
pub use records::{
    Booking, Discount, Exhibition, Invoice, InvoiceStatus, StallLine,
};
