//! Hard caps enforced by the engine and auth layers.

pub const MAX_USER_LEN: usize = 256;
pub const MAX_USERNAME_LEN: usize = 128;
/// Argon2 accepts longer inputs, but nothing legitimate needs them.
pub const MAX_PASSWORD_LEN: usize = 1024;
pub const MAX_RESERVATIONS: usize = 1_000_000;
/// One booking per five minutes of the day.
pub const MAX_RESERVATIONS_PER_DAY: usize = 288;
pub const MAX_USERS: usize = 100_000;
