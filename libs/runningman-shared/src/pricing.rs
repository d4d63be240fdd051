/// Tax applied to single-episode purchases, in percent.
pub const TAX_PERCENT: i64 = 11;

/// Price plus tax, with the tax rounded up to the next whole unit.
pub fn with_tax(price: i64) -> i64 {
    price + (price * TAX_PERCENT + 99) / 100
}
