use crate::core::types::DecisionRow;
use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use sha2::{Digest, Sha256};
use std::fmt;

/// Value of one declared field, as seen by the digest.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue<'a> {
    Missing,
    Text(&'a str),
    Number(f64),
}

impl<'a> From<Option<&'a str>> for FieldValue<'a> {
    fn from(v: Option<&'a str>) -> Self {
        v.map_or(FieldValue::Missing, FieldValue::Text)
    }
}

impl From<Option<f64>> for FieldValue<'_> {
    fn from(v: Option<f64>) -> Self {
        v.map_or(FieldValue::Missing, FieldValue::Number)
    }
}

/// An entity whose operational state can be compared across snapshots.
pub trait Fingerprintable {
    /// Operationally relevant fields, in digest order.
    const FIELDS: &'static [&'static str];

    fn identity(&self) -> &str;

    /// Value of one of `FIELDS`. Unknown names are `Missing`.
    fn field(&self, name: &str) -> FieldValue<'_>;
}

impl Fingerprintable for DecisionRow {
    const FIELDS: &'static [&'static str] = &[
        "decision",
        "confidence",
        "hold_reason",
        "position_side",
        "position_qty",
        "position_avg_price",
    ];

    fn identity(&self) -> &str {
        &self.symbol
    }

    fn field(&self, name: &str) -> FieldValue<'_> {
        let pos = self.position.as_ref();
        match name {
            "decision" => self.decision.as_deref().into(),
            "confidence" => self.confidence.into(),
            "hold_reason" => self.hold_reason.as_deref().into(),
            "position_side" => pos.and_then(|p| p.side.as_deref()).into(),
            "position_qty" => pos.and_then(|p| p.qty).into(),
            "position_avg_price" => pos.and_then(|p| p.avg_price).into(),
            _ => FieldValue::Missing,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Fixed-precision text form of a number, or `None` when it has no finite
/// decimal form.
fn canonical_number(x: f64, precision: u32) -> Option<String> {
    if !x.is_finite() {
        return None;
    }
    let d = Decimal::from_f64(x)?
        .round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    // -0 and 0 must digest the same
    let d = if d.is_zero() { Decimal::ZERO } else { d };
    Some(d.to_string())
}

/// Digest of `row`'s declared fields. Numbers are rounded to `precision`
/// decimal places first; missing values get their own tag so they never
/// alias with zero or the empty string.
pub fn fingerprint<T: Fingerprintable>(row: &T, precision: u32) -> Fingerprint {
    let mut hasher = Sha256::new();
    for name in T::FIELDS {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        match row.field(name) {
            FieldValue::Missing => hasher.update(b"\x00missing"),
            FieldValue::Text(s) => {
                hasher.update(b"\x01");
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            FieldValue::Number(x) => match canonical_number(x, precision) {
                Some(text) => {
                    hasher.update(b"\x02");
                    hasher.update(text.as_bytes());
                }
                None if x.is_nan() => hasher.update(b"\x03nan"),
                None if x.is_infinite() => {
                    hasher.update(if x > 0.0 { b"\x03+inf" } else { b"\x03-inf" })
                }
                // finite but beyond what a decimal holds
                None => {
                    hasher.update(b"\x04");
                    hasher.update(x.to_bits().to_le_bytes());
                }
            },
        }
        hasher.update(b"\x1e");
    }
    Fingerprint(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PositionState;
    use serde_json::json;

    fn row(decision: &str, confidence: f64) -> DecisionRow {
        DecisionRow {
            symbol: "QQQ".into(),
            decision: Some(decision.into()),
            confidence: Some(confidence),
            hold_reason: None,
            position: Some(PositionState {
                side: Some("long".into()),
                qty: Some(10.0),
                avg_price: Some(401.25),
            }),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_same_row_same_fingerprint() {
        let r = row("BUY", 0.812);
        assert_eq!(fingerprint(&r, 4), fingerprint(&r.clone(), 4));
    }

    #[test]
    fn test_field_order_in_source_json_does_not_matter() {
        let a: DecisionRow = serde_json::from_str(
            r#"{"symbol":"QQQ","decision":"BUY","confidence":0.5,"position":{"side":"long","qty":3.0}}"#,
        )
        .unwrap();
        let b: DecisionRow = serde_json::from_str(
            r#"{"position":{"qty":3.0,"side":"long"},"confidence":0.5,"decision":"BUY","symbol":"QQQ"}"#,
        )
        .unwrap();
        assert_eq!(fingerprint(&a, 4), fingerprint(&b, 4));
    }

    #[test]
    fn test_irrelevant_metadata_is_ignored() {
        let a = row("BUY", 0.812);
        let mut b = a.clone();
        b.extra.insert("latency_ms".into(), json!(87));
        b.extra.insert("notes".into(), json!("re-ran model"));
        assert_eq!(fingerprint(&a, 4), fingerprint(&b, 4));
    }

    #[test]
    fn test_rounding_absorbs_jitter() {
        let a = row("BUY", 0.812);
        let b = row("BUY", 0.8121);
        assert_eq!(fingerprint(&a, 2), fingerprint(&b, 2));
        assert_eq!(fingerprint(&a, 3), fingerprint(&b, 3));
        assert_ne!(fingerprint(&a, 4), fingerprint(&b, 4));
    }

    #[test]
    fn test_every_operational_field_is_sensitive() {
        let base = row("BUY", 0.812);
        let fp = fingerprint(&base, 3);

        let mut r = base.clone();
        r.decision = Some("SELL".into());
        assert_ne!(fingerprint(&r, 3), fp);

        let mut r = base.clone();
        r.confidence = Some(0.9);
        assert_ne!(fingerprint(&r, 3), fp);

        let mut r = base.clone();
        r.hold_reason = Some("spread too wide".into());
        assert_ne!(fingerprint(&r, 3), fp);

        let mut r = base.clone();
        r.position.as_mut().unwrap().side = Some("short".into());
        assert_ne!(fingerprint(&r, 3), fp);

        let mut r = base.clone();
        r.position.as_mut().unwrap().qty = Some(11.0);
        assert_ne!(fingerprint(&r, 3), fp);

        let mut r = base.clone();
        r.position.as_mut().unwrap().avg_price = Some(401.5);
        assert_ne!(fingerprint(&r, 3), fp);
    }

    #[test]
    fn test_missing_does_not_alias_zero_or_empty() {
        let mut zero = row("BUY", 0.0);
        let mut missing = row("BUY", 0.0);
        missing.confidence = None;
        assert_ne!(fingerprint(&zero, 4), fingerprint(&missing, 4));

        zero.hold_reason = Some("".into());
        missing.confidence = Some(0.0);
        assert_ne!(fingerprint(&zero, 4), fingerprint(&missing, 4));

        let mut flat = row("BUY", 0.5);
        flat.position = None;
        let mut zeroed = row("BUY", 0.5);
        zeroed.position = Some(PositionState {
            side: None,
            qty: Some(0.0),
            avg_price: Some(0.0),
        });
        assert_ne!(fingerprint(&flat, 4), fingerprint(&zeroed, 4));
    }

    #[test]
    fn test_negative_zero_and_trailing_zeros_normalize() {
        assert_eq!(canonical_number(-0.0, 2), canonical_number(0.0, 2));
        assert_eq!(canonical_number(-0.0001, 2), Some("0".to_string()));
        assert_eq!(canonical_number(1.50, 4), Some("1.5".to_string()));
        assert_eq!(canonical_number(f64::NAN, 4), None);
    }

    #[test]
    fn test_huge_and_non_finite_values_stay_distinct() {
        let values = [1e30, 2e30, -1e30, f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
        let digests: Vec<Fingerprint> = values
            .into_iter()
            .map(|c| fingerprint(&row("BUY", c), 4))
            .collect();
        for (i, a) in digests.iter().enumerate() {
            for b in &digests[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(canonical_number(1e30, 4), None);
        assert_eq!(fingerprint(&row("BUY", 1e30), 4), digests[0]);
    }

    #[test]
    fn test_midpoint_rounds_away_from_zero() {
        assert_eq!(canonical_number(0.125, 2), Some("0.13".to_string()));
        assert_eq!(canonical_number(-0.125, 2), Some("-0.13".to_string()));
    }
}
