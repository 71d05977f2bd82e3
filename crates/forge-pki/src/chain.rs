//! Chain bundle assembly.

use crate::error::{Error, Result};
use crate::types::Certificate;

/// Separator placed between PEM blocks: the newline ending one block plus
/// this one form a blank line.
const SEPARATOR: &str = "\n";

/// Concatenated PEM certificates in caller-specified order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBundle {
    pem: String,
    len: usize,
}

impl ChainBundle {
    /// Returns the bundle text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pem
    }

    /// Returns the number of certificates in the bundle.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the bundle holds no certificates. Never true for
    /// an assembled bundle.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Splits the bundle back into its PEM blocks, byte-equal to the inputs.
    #[must_use]
    pub fn split_pems(&self) -> Vec<String> {
        split_pems(&self.pem)
    }

    /// Parses every certificate in the bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if a block is not a valid certificate.
    pub fn certificates(&self) -> Result<Vec<Certificate>> {
        self.split_pems()
            .iter()
            .map(|pem| Certificate::from_pem(pem))
            .collect()
    }
}

/// Concatenates certificates in the given order, separated by a blank line.
///
/// # Errors
///
/// Returns [`Error::EmptyChain`] if `certificates` is empty.
pub fn assemble(certificates: &[Certificate]) -> Result<ChainBundle> {
    if certificates.is_empty() {
        return Err(Error::EmptyChain);
    }
    let pem = certificates
        .iter()
        .map(Certificate::pem)
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    Ok(ChainBundle {
        pem,
        len: certificates.len(),
    })
}

/// Splits bundle text on blank lines into newline-terminated PEM blocks.
#[must_use]
pub fn split_pems(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|block| block.trim_matches('\n'))
        .filter(|block| !block.is_empty())
        .map(|block| format!("{block}\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::self_sign;
    use crate::test_support::{profile, test_key};
    use proptest::prelude::*;

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(assemble(&[]), Err(Error::EmptyChain)));
    }

    #[test]
    fn split_recovers_inputs_byte_for_byte() {
        let intermediate = self_sign(&test_key(1), &profile("Intermediate", 10)).unwrap();
        let root = self_sign(&test_key(0), &profile("Root", 10)).unwrap();

        let bundle = assemble(&[intermediate.clone(), root.clone()]).unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.as_str().contains("-----END CERTIFICATE-----\n\n-----BEGIN"));

        let pems = bundle.split_pems();
        assert_eq!(pems, vec![intermediate.pem(), root.pem()]);

        let parsed = bundle.certificates().unwrap();
        assert_eq!(parsed[0].der(), intermediate.der());
        assert_eq!(parsed[1].der(), root.der());
    }

    #[test]
    fn single_certificate_bundle_is_its_pem() {
        let root = self_sign(&test_key(0), &profile("Root", 10)).unwrap();
        let bundle = assemble(std::slice::from_ref(&root)).unwrap();
        assert_eq!(bundle.as_str(), root.pem());
    }

    proptest! {
        #[test]
        fn split_inverts_join(blocks in proptest::collection::vec("[A-Za-z0-9+/=]{1,64}", 1..6)) {
            let pems: Vec<String> = blocks
                .iter()
                .map(|b| format!("-----BEGIN CERTIFICATE-----\n{b}\n-----END CERTIFICATE-----\n"))
                .collect();
            let text = pems.join(SEPARATOR);
            prop_assert_eq!(split_pems(&text), pems);
        }
    }
}
