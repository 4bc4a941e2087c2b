pub mod fill;
pub mod inspect;
