use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::domain::audit::AuditLogEntry;
use crate::domain::format_timestamp;

type HmacSha256 = Hmac<Sha256>;

/// Keyed HMAC-SHA256 over an entry's canonical material.
///
/// Each field is fed to the MAC behind its big-endian `u64` byte length, so no choice of
/// free text can shift bytes from one field into the next.
#[derive(Clone, Debug)]
pub struct AuditSealer {
    key: SecretString,
}

impl AuditSealer {
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }

    pub fn seal(&self, entry: &AuditLogEntry) -> String {
        match self.mac(entry) {
            Some(mac) => encode_hex(mac.finalize().into_bytes().as_slice()),
            None => String::new(),
        }
    }

    /// Compares in constant time against the stored hex seal.
    pub fn verify(&self, entry: &AuditLogEntry) -> bool {
        let (Some(stored), Some(mac)) = (decode_hex(&entry.seal), self.mac(entry)) else {
            return false;
        };
        !stored.is_empty() && mac.verify_slice(&stored).is_ok()
    }

    fn mac(&self, entry: &AuditLogEntry) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).ok()?;
        for field in seal_material(entry) {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field.as_bytes());
        }
        Some(mac)
    }
}

fn seal_material(entry: &AuditLogEntry) -> [String; 7] {
    let metadata = match serde_json::to_string(&entry.metadata) {
        Ok(json) => json,
        Err(_) => entry.metadata.kind().to_string(),
    };
    [
        entry.id.to_string(),
        entry.approval_id.to_string(),
        entry.approver.clone(),
        entry.action.as_str().to_string(),
        format_timestamp(&entry.timestamp),
        entry.comment.clone(),
        metadata,
    ]
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 || !value.is_ascii() {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&value[index..index + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{decode_hex, AuditSealer};
    use crate::domain::approval::{ApprovalId, ApprovalStatus};
    use crate::domain::audit::{AuditAction, AuditLogEntry, AuditMetadata};

    fn sealer(key: &str) -> AuditSealer {
        AuditSealer::new(SecretString::from(key.to_string()))
    }

    fn sealed(sealer: &AuditSealer) -> AuditLogEntry {
        let mut entry = AuditLogEntry::new(
            ApprovalId("apr-1".to_string()),
            "admin@x",
            AuditAction::Rejected,
            "policy change",
            AuditMetadata::Alteration {
                previous_status: ApprovalStatus::Approved,
                new_status: ApprovalStatus::Rejected,
            },
        );
        entry.seal = sealer.seal(&entry);
        entry
    }

    #[test]
    fn seal_is_hex_sha256_width() {
        let entry = sealed(&sealer("0123456789abcdef"));
        assert_eq!(entry.seal.len(), 64);
        assert!(entry.seal.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn untouched_entry_verifies() {
        let sealer = sealer("0123456789abcdef");
        assert!(sealer.verify(&sealed(&sealer)));
    }

    #[test]
    fn edited_fields_break_the_seal() {
        let sealer = sealer("0123456789abcdef");
        let mut entry = sealed(&sealer);
        entry.comment = "nothing to see".to_string();
        assert!(!sealer.verify(&entry));

        let mut entry = sealed(&sealer);
        entry.metadata = AuditMetadata::None;
        assert!(!sealer.verify(&entry));
    }

    #[test]
    fn different_keys_disagree() {
        let entry = sealed(&sealer("0123456789abcdef"));
        assert!(!sealer("fedcba9876543210").verify(&entry));
    }

    #[test]
    fn unsealed_entries_never_verify() {
        let mut entry = sealed(&sealer("0123456789abcdef"));
        entry.seal.clear();
        assert!(!sealer("0123456789abcdef").verify(&entry));
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let rendered = format!("{:?}", sealer("0123456789abcdef"));
        assert!(!rendered.contains("0123456789abcdef"));
    }

    #[test]
    fn text_moved_across_a_field_boundary_breaks_the_seal() {
        let sealer = sealer("0123456789abcdef");
        let mut entry = sealed(&sealer);
        entry.approver = "b@x|ok".to_string();
        entry.comment = "fine".to_string();
        entry.seal = sealer.seal(&entry);

        let mut shifted = entry.clone();
        shifted.approver = "b@x".to_string();
        shifted.comment = "ok|fine".to_string();
        assert!(!sealer.verify(&shifted));
    }

    #[test]
    fn malformed_seals_never_verify() {
        let sealer = sealer("0123456789abcdef");
        let mut entry = sealed(&sealer);
        entry.seal = entry.seal.to_uppercase();
        assert!(sealer.verify(&entry), "hex case does not matter");

        entry.seal.pop();
        assert!(!sealer.verify(&entry));
        entry.seal = "zz".repeat(32);
        assert!(!sealer.verify(&entry));
    }

    #[test]
    fn hex_decoding_rejects_odd_or_foreign_input() {
        assert_eq!(decode_hex("00ff"), Some(vec![0x00, 0xff]));
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("\u{e9}\u{e9}"), None);
    }
}
