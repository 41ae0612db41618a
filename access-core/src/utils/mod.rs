pub mod password;
pub mod token;

pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use token::{constant_time_eq, generate_random_token, hash_token};
