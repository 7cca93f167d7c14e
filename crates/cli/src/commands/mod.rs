pub mod inspect;
pub mod simulate;
