//! IBAN check digits
//!
//! Scenarios register bank accounts that need syntactically valid IBANs.
//! Check digits follow ISO 7064 mod 97-10: the country code and `00` are
//! moved behind the BBAN, letters become two-digit numbers (A=10 .. Z=35),
//! and the check digits are `98 - (n mod 97)`.

use uuid::Uuid;

use crate::common::{Error, Result};

/// Default country for generated IBANs
pub const DEFAULT_COUNTRY: &str = "DE";

/// Default bank code for generated IBANs
pub const DEFAULT_BBAN: &str = "12345678";

/// Digits in a generated account number
const ACCOUNT_DIGITS: usize = 10;

/// Fill in the check digits of `iban`, whatever its positions 3-4 hold
///
/// The result is upper-cased.
pub fn complete_iban(iban: &str) -> Result<String> {
    let iban = iban.trim().to_ascii_uppercase();
    if iban.len() < 5 || !iban.is_ascii() {
        return Err(Error::Config(format!("'{}' is too short to be an IBAN", iban)));
    }
    let (country, bban) = (&iban[..2], &iban[4..]);
    if !country.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(Error::Config(format!("invalid country code '{}'", country)));
    }

    let remainder = mod97(bban.chars().chain(country.chars()).chain("00".chars()))
        .ok_or_else(|| Error::Config(format!("'{}' contains characters not allowed in an IBAN", iban)))?;

    Ok(format!("{}{:02}{}", country, 98 - remainder, bban))
}

/// Whether the check digits of `iban` are correct
pub fn is_valid_iban(iban: &str) -> bool {
    let iban: String = iban.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_ascii_uppercase();
    if iban.len() < 5 || !iban.is_ascii() {
        return false;
    }
    if !iban[..2].chars().all(|c| c.is_ascii_uppercase()) || !iban[2..4].chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    mod97(iban[4..].chars().chain(iban[..4].chars())) == Some(1)
}

/// Build an IBAN from its parts; a missing account number is random
pub fn generate(country: &str, bban: &str, account: Option<&str>) -> Result<String> {
    let account = match account {
        Some(account) => account.to_string(),
        None => random_digits(ACCOUNT_DIGITS),
    };
    complete_iban(&format!("{}00{}{}", country, bban, account))
}

/// Remainder mod 97 of the number spelled by `chars`, folding as we go so
/// arbitrarily long inputs never overflow
fn mod97(mut chars: impl Iterator<Item = char>) -> Option<u32> {
    chars.try_fold(0u32, |acc, c| {
        let value = c.to_digit(36)?;
        Some(if value < 10 {
            (acc * 10 + value) % 97
        } else {
            (acc * 100 + value) % 97
        })
    })
}

fn random_digits(count: usize) -> String {
    let mut digits = String::with_capacity(count);
    while digits.len() < count {
        let mut n = Uuid::new_v4().as_u128();
        while n > 0 && digits.len() < count {
            digits.push(char::from(b'0' + (n % 10) as u8));
            n /= 10;
        }
    }
    digits
}
