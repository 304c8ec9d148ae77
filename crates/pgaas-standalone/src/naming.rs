//! Generated names and secrets
//!
//! Both take the generator as an argument so reconciles can share one seeded
//! generator and tests stay deterministic.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Prefix of generated deployment namespaces
pub const NAMESPACE_PREFIX: &str = "sv-postgresql-s-";

const SUFFIX_LEN: usize = 8;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated passwords
pub const PASSWORD_LEN: usize = 40;

/// Suggest a deployment namespace name, e.g. `sv-postgresql-s-k3x9a0qz`
pub fn deployment_namespace_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("{NAMESPACE_PREFIX}{suffix}")
}

/// Random alphanumeric password
pub fn generate_password<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..PASSWORD_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}
