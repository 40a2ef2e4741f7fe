mod money;

pub mod helpers;
pub mod op;
mod secret;

pub use money::{Money, MoneyConversionError, BDT_CURRENCY_CODE, BDT_CURRENCY_CODE_LOWER};
pub use secret::Secret;
