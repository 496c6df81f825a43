//! Utility functions for the kgiton-rust-ble crate.

/// Pounds per kilogram.
pub const LB_PER_KG: f64 = 2.204_622_621_8;

/// Convert kilograms to pounds.
///
/// # Arguments
///
/// * `kg` - Weight in kilograms
///
/// # Returns
///
/// Weight in pounds
///
/// # Example
///
/// ```
/// use kgiton_rust_ble::kg_to_lb;
///
/// let pounds = kg_to_lb(1.0);
/// assert!((pounds - 2.2046).abs() < 0.001);
/// ```
#[inline]
pub fn kg_to_lb(kg: f64) -> f64 {
    kg * LB_PER_KG
}

/// Convert pounds to kilograms.
///
/// # Arguments
///
/// * `lb` - Weight in pounds
///
/// # Returns
///
/// Weight in kilograms
///
/// # Example
///
/// ```
/// use kgiton_rust_ble::lb_to_kg;
///
/// let kilograms = lb_to_kg(2.204_622_621_8);
/// assert!((kilograms - 1.0).abs() < 0.001);
/// ```
#[inline]
pub fn lb_to_kg(lb: f64) -> f64 {
    lb / LB_PER_KG
}

/// Convert grams to kilograms.
#[inline]
pub fn g_to_kg(g: f64) -> f64 {
    g / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kg_to_lb() {
        assert!((kg_to_lb(0.0) - 0.0).abs() < 0.001);
        assert!((kg_to_lb(1.0) - 2.2046).abs() < 0.001);
        assert!((kg_to_lb(300.0) - 661.387).abs() < 0.001);
    }

    #[test]
    fn test_lb_to_kg() {
        assert!((lb_to_kg(0.0) - 0.0).abs() < 0.001);
        assert!((lb_to_kg(10.0) - 4.5359).abs() < 0.001);
    }

    #[test]
    fn test_g_to_kg() {
        assert!((g_to_kg(1250.0) - 1.25).abs() < 0.0001);
    }

    #[test]
    fn test_weight_roundtrip() {
        let original = 12.345;
        let converted = lb_to_kg(kg_to_lb(original));
        assert!((converted - original).abs() < 0.0001);
    }
}
