//! Cache keys derived from an invoice's relationship chain.
//!
//! A [`VersionSnapshot`] records `(identity, updated_at)` for the invoice,
//! its booking and the booking's exhibition. The [`Fingerprint`] hashes that
//! snapshot together with a configurable set of [`ScalarField`]s, because
//! some writers change amounts or discounts without bumping `updated_at`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use folio_model::{Invoice, InvoiceId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::error::FingerprintError;

const FINGERPRINT_VERSION: &[u8] = b"folio-fp-v2";
const CACHE_KEY_PREFIX: &str = "artifacts/v1/";

/// Position of an entity in the invoice's relationship chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    Document,
    Parent,
    Grandparent,
}

impl EntityRole {
    fn tag(self) -> u8 {
        match self {
            EntityRole::Document => 1,
            EntityRole::Parent => 2,
            EntityRole::Grandparent => 3,
        }
    }
}

impl fmt::Display for EntityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRole::Document => f.write_str("document"),
            EntityRole::Parent => f.write_str("parent"),
            EntityRole::Grandparent => f.write_str("grandparent"),
        }
    }
}

/// Identity and last-modified marker of one entity. `None` marks an absent
/// relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    pub role: EntityRole,
    pub id: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl VersionStamp {
    fn absent(role: EntityRole) -> Self {
        Self {
            role,
            id: None,
            updated_at: None,
        }
    }
}

/// Ordered version stamps for a document and the entities it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionSnapshot(Vec<VersionStamp>);

impl VersionSnapshot {
    /// Capture document → booking → exhibition, in that order.
    pub fn capture(invoice: &Invoice) -> Self {
        let document = VersionStamp {
            role: EntityRole::Document,
            id: (!invoice.id.is_nil()).then(|| invoice.id.to_uuid()),
            updated_at: Some(invoice.updated_at),
        };

        let parent = invoice
            .booking
            .as_ref()
            .map(|b| VersionStamp {
                role: EntityRole::Parent,
                id: Some(b.id.to_uuid()),
                updated_at: Some(b.updated_at),
            })
            .unwrap_or_else(|| VersionStamp::absent(EntityRole::Parent));

        let grandparent = invoice
            .exhibition()
            .map(|e| VersionStamp {
                role: EntityRole::Grandparent,
                id: Some(e.id.to_uuid()),
                updated_at: Some(e.updated_at),
            })
            .unwrap_or_else(|| VersionStamp::absent(EntityRole::Grandparent));

        Self(vec![document, parent, grandparent])
    }

    pub fn from_stamps(stamps: Vec<VersionStamp>) -> Self {
        Self(stamps)
    }

    pub fn stamps(&self) -> &[VersionStamp] {
        &self.0
    }

    pub fn stamp(&self, role: EntityRole) -> Option<&VersionStamp> {
        self.0.iter().find(|s| s.role == role)
    }
}

/// Scalar values folded into the fingerprint alongside the version stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarField {
    Amount,
    Status,
    DiscountKind,
    DiscountValue,
    TaxPercent,
    LineItems,
}

impl ScalarField {
    pub const ALL: [ScalarField; 6] = [
        ScalarField::Amount,
        ScalarField::Status,
        ScalarField::DiscountKind,
        ScalarField::DiscountValue,
        ScalarField::TaxPercent,
        ScalarField::LineItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarField::Amount => "amount",
            ScalarField::Status => "status",
            ScalarField::DiscountKind => "discount_kind",
            ScalarField::DiscountValue => "discount_value",
            ScalarField::TaxPercent => "tax_percent",
            ScalarField::LineItems => "line_items",
        }
    }

    fn tag(self) -> u8 {
        match self {
            ScalarField::Amount => 10,
            ScalarField::Status => 11,
            ScalarField::DiscountKind => 12,
            ScalarField::DiscountValue => 13,
            ScalarField::TaxPercent => 14,
            ScalarField::LineItems => 15,
        }
    }
}

impl FromStr for ScalarField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ScalarField::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| format!("unknown fingerprint field `{s}`"))
    }
}

/// The set of scalar fields a [`FingerprintGenerator`] hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintFields(BTreeSet<ScalarField>);

impl Default for FingerprintFields {
    fn default() -> Self {
        Self::all()
    }
}

impl FingerprintFields {
    pub fn all() -> Self {
        Self(ScalarField::ALL.into_iter().collect())
    }

    pub fn only(fields: impl IntoIterator<Item = ScalarField>) -> Self {
        Self(fields.into_iter().collect())
    }

    pub fn contains(&self, field: ScalarField) -> bool {
        self.0.contains(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = ScalarField> + '_ {
        self.0.iter().copied()
    }
}

/// Hex-encoded SHA-256 cache key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the artifact lives in the artifact store.
    pub fn cache_key(&self) -> String {
        let mut key = String::with_capacity(CACHE_KEY_PREFIX.len() + 64);
        key.push_str(CACHE_KEY_PREFIX);
        key.push_str(&self.0);
        key
    }

    /// Inverse of [`Fingerprint::cache_key`], for keys listed from the store.
    pub fn from_cache_key(key: &str) -> Option<Self> {
        let hex = key.strip_prefix(CACHE_KEY_PREFIX)?;
        Self::is_valid_hex(hex).then(|| Self(hex.to_string()))
    }

    fn is_valid_hex(token: &str) -> bool {
        token.len() == 64
            && token
                .as_bytes()
                .iter()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// A key seeded from identity and the current wall-clock time. It never
    /// matches a stored artifact, so using it forces a render.
    pub fn unique_fallback(id: InvoiceId, now: SystemTime) -> Self {
        let nanos = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(b"folio-fp-fallback");
        hasher.update(id.as_uuid().as_bytes());
        hasher.update(nanos.to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fingerprint").field(&self.0).finish()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives [`Fingerprint`]s for invoices.
#[derive(Debug, Clone, Default)]
pub struct FingerprintGenerator {
    fields: FingerprintFields,
}

impl FingerprintGenerator {
    pub fn new(fields: FingerprintFields) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &FingerprintFields {
        &self.fields
    }

    /// Hash the invoice's version snapshot plus the configured scalar fields.
    ///
    /// Missing relations hash as sentinels; only a nil invoice id fails.
    pub fn generate(
        &self,
        invoice: &Invoice,
    ) -> Result<Fingerprint, FingerprintError> {
        if invoice.id.is_nil() {
            return Err(FingerprintError);
        }

        let snapshot = VersionSnapshot::capture(invoice);
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION);

        for stamp in snapshot.stamps() {
            hasher.update([stamp.role.tag()]);
            match stamp.id {
                Some(id) => {
                    hasher.update([1u8]);
                    hasher.update(id.as_bytes());
                }
                None => hasher.update([0u8]),
            }
            match stamp.updated_at {
                Some(at) => {
                    hasher.update([1u8]);
                    hasher.update(at.timestamp().to_be_bytes());
                    hasher.update(at.timestamp_subsec_nanos().to_be_bytes());
                }
                None => hasher.update([0u8]),
            }
        }

        for field in self.fields.iter() {
            hasher.update([field.tag()]);
            self.hash_scalar(&mut hasher, field, invoice);
        }

        Ok(Fingerprint(hex::encode(hasher.finalize())))
    }

    /// [`Self::generate`], falling back to [`Fingerprint::unique_fallback`]
    /// so a document without identity is rendered rather than rejected.
    pub fn generate_or_fallback(&self, invoice: &Invoice) -> Fingerprint {
        match self.generate(invoice) {
            Ok(fp) => fp,
            Err(err) => {
                warn!(
                    invoice_number = %invoice.invoice_number,
                    "{err}; using a one-off fingerprint"
                );
                Fingerprint::unique_fallback(invoice.id, SystemTime::now())
            }
        }
    }

    fn hash_scalar(
        &self,
        hasher: &mut Sha256,
        field: ScalarField,
        invoice: &Invoice,
    ) {
        let booking = invoice.booking.as_ref();
        match field {
            ScalarField::Amount => hash_decimal(hasher, Some(invoice.amount)),
            ScalarField::Status => hash_str(hasher, Some(invoice.status.as_str())),
            ScalarField::DiscountKind => hash_str(
                hasher,
                booking.and_then(|b| b.discount).map(|d| d.kind()),
            ),
            ScalarField::DiscountValue => hash_decimal(
                hasher,
                booking.and_then(|b| b.discount).map(|d| d.value()),
            ),
            ScalarField::TaxPercent => {
                hash_decimal(hasher, booking.map(|b| b.tax_percent))
            }
            ScalarField::LineItems => match booking {
                Some(b) => {
                    hasher.update([1u8]);
                    hasher.update((b.stalls.len() as u64).to_be_bytes());
                    for line in &b.stalls {
                        hasher.update(line.stall_id.as_uuid().as_bytes());
                        hash_str(hasher, Some(line.stall_number.as_str()));
                        hash_decimal(hasher, Some(line.width));
                        hash_decimal(hasher, Some(line.height));
                        hash_decimal(hasher, Some(line.rate));
                    }
                }
                None => hasher.update([0u8]),
            },
        }
    }
}

fn hash_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update((v.len() as u64).to_be_bytes());
            hasher.update(v.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

// `10` and `10.00` are the same amount and must hash the same.
fn hash_decimal(hasher: &mut Sha256, value: Option<Decimal>) {
    let text = value.map(|d| d.normalize().to_string());
    hash_str(hasher, text.as_deref());
}
