//! Per-CA mutable bookkeeping.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Role;

/// First serial handed out by a fresh CA.
pub const INITIAL_SERIAL: u64 = 1000;

/// First CRL number of a fresh intermediate CA.
pub const INITIAL_CRL_NUMBER: u64 = 1000;

/// Status of an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    /// Certificate is in force.
    Valid,
    /// Certificate has been revoked.
    Revoked,
}

/// One entry of a CA's issuance ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    /// Serial assigned to the certificate.
    pub serial: u64,
    /// Subject in OpenSSL slash notation.
    pub subject: String,
    /// End of the validity window.
    pub not_after: DateTime<Utc>,
    /// Current status.
    pub status: CertStatus,
    /// Revocation time, if revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Serial counter, CRL number and ledger of one CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaState {
    /// The CA this state belongs to.
    pub role: Role,
    /// Serial the next issued certificate receives.
    pub serial: u64,
    /// Next CRL number, kept by the intermediate only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crl_number: Option<u64>,
    /// Append-only issuance ledger.
    #[serde(default)]
    pub ledger: Vec<IssuanceRecord>,
}

impl CaState {
    /// Creates the initial state of a CA role.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotACertificateAuthority`] for the OCSP responder.
    pub fn new(role: Role) -> Result<Self> {
        if !role.is_ca() {
            return Err(Error::NotACertificateAuthority(role));
        }
        Ok(Self {
            role,
            serial: INITIAL_SERIAL,
            crl_number: (role == Role::Intermediate).then_some(INITIAL_CRL_NUMBER),
            ledger: Vec::new(),
        })
    }

    /// Returns the state after issuing a certificate with the current serial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the serial counter would overflow.
    pub fn record_issuance(&self, subject: String, not_after: DateTime<Utc>) -> Result<Self> {
        let next = self
            .serial
            .checked_add(1)
            .ok_or_else(|| Error::Validation("serial counter exhausted".into()))?;

        let mut updated = self.clone();
        updated.ledger.push(IssuanceRecord {
            serial: self.serial,
            subject,
            not_after,
            status: CertStatus::Valid,
            revoked_at: None,
        });
        updated.serial = next;
        Ok(updated)
    }

    /// Looks up a ledger entry by serial.
    #[must_use]
    pub fn record(&self, serial: u64) -> Option<&IssuanceRecord> {
        self.ledger.iter().find(|record| record.serial == serial)
    }

    /// Renders the serial file the way `openssl ca` keeps it.
    #[must_use]
    pub fn openssl_serial(&self) -> String {
        format!("{}\n", hex_serial(self.serial))
    }

    /// Renders the CRL number file, if this CA keeps one.
    #[must_use]
    pub fn openssl_crl_number(&self) -> Option<String> {
        self.crl_number.map(|n| format!("{}\n", hex_serial(n)))
    }

    /// Renders the ledger as an OpenSSL `index.txt` database.
    #[must_use]
    pub fn openssl_index(&self) -> String {
        let mut out = String::new();
        for record in &self.ledger {
            let (flag, revoked) = match record.status {
                CertStatus::Valid => ('V', String::new()),
                CertStatus::Revoked => (
                    'R',
                    record.revoked_at.map(openssl_time).unwrap_or_default(),
                ),
            };
            let _ = writeln!(
                out,
                "{flag}\t{}\t{revoked}\t{}\tunknown\t{}",
                openssl_time(record.not_after),
                hex_serial(record.serial),
                record.subject
            );
        }
        out
    }
}

/// Formats a serial as upper-case hex with an even number of digits.
#[must_use]
pub fn hex_serial(serial: u64) -> String {
    let hex = format!("{serial:X}");
    if hex.len() % 2 == 1 { format!("0{hex}") } else { hex }
}

fn openssl_time(at: DateTime<Utc>) -> String {
    at.format("%y%m%d%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn fresh_states() {
        let root = CaState::new(Role::Root).unwrap();
        assert_eq!(root.serial, 1000);
        assert_eq!(root.crl_number, None);
        assert!(root.ledger.is_empty());

        let intermediate = CaState::new(Role::Intermediate).unwrap();
        assert_eq!(intermediate.crl_number, Some(1000));

        assert!(matches!(
            CaState::new(Role::Ocsp),
            Err(Error::NotACertificateAuthority(Role::Ocsp))
        ));
    }

    #[test]
    fn issuance_advances_serial_without_touching_input() {
        let state = CaState::new(Role::Root).unwrap();
        let expiry = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        let next = state.record_issuance("/CN=a".into(), expiry).unwrap();

        assert_eq!(state.serial, 1000);
        assert!(state.ledger.is_empty());
        assert_eq!(next.serial, 1001);
        assert_eq!(next.ledger.len(), 1);
        assert_eq!(next.record(1000).unwrap().status, CertStatus::Valid);
    }

    #[test]
    fn serial_overflow_is_an_error() {
        let mut state = CaState::new(Role::Root).unwrap();
        state.serial = u64::MAX;
        assert!(state.record_issuance("/CN=a".into(), Utc::now()).is_err());
    }

    #[test]
    fn openssl_renderings() {
        let state = CaState::new(Role::Intermediate).unwrap();
        let expiry = Utc.with_ymd_and_hms(2035, 6, 1, 12, 0, 0).unwrap();
        let state = state
            .record_issuance("/C=DE/CN=Example OCSP".into(), expiry)
            .unwrap();

        assert_eq!(state.openssl_serial(), "03E9\n");
        assert_eq!(state.openssl_crl_number().as_deref(), Some("03E8\n"));
        assert_eq!(
            state.openssl_index(),
            "V\t350601120000Z\t\t03E8\tunknown\t/C=DE/CN=Example OCSP\n"
        );
    }

    #[test]
    fn revoked_records_carry_revocation_time() {
        let mut state = CaState::new(Role::Root)
            .unwrap()
            .record_issuance(
                "/CN=gone".into(),
                Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();
        state.ledger[0].status = CertStatus::Revoked;
        state.ledger[0].revoked_at = Some(Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap());

        assert!(state.openssl_index().starts_with("R\t300101000000Z\t260203040506Z\t03E8"));
    }

    #[test]
    fn state_survives_json() {
        let state = CaState::new(Role::Intermediate)
            .unwrap()
            .record_issuance("/CN=x".into(), Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(serde_json::from_str::<CaState>(&json).unwrap(), state);
    }

    proptest! {
        #[test]
        fn serials_are_never_reused(issues in 1usize..40) {
            let mut state = CaState::new(Role::Root).unwrap();
            for i in 0..issues {
                let before = state.serial;
                state = state.record_issuance(format!("/CN={i}"), Utc::now()).unwrap();
                prop_assert_eq!(state.serial, before + 1);
            }
            let mut serials: Vec<u64> = state.ledger.iter().map(|r| r.serial).collect();
            prop_assert_eq!(serials.len(), issues);
            serials.dedup();
            prop_assert_eq!(serials.len(), issues);
            prop_assert!(state.ledger.iter().all(|r| r.serial < state.serial));
        }
    }
}
