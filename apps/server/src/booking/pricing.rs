use serde::Serialize;

use crate::models::{Coupon, DiscountType, JewelryItem, Service};

/// Price breakdown for the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PriceQuote {
    pub base_price: i64,
    pub discount_amount: i64,
    pub final_price: i64,
}

pub fn base_price(services: &[Service], jewelry: &[JewelryItem]) -> i64 {
    services.iter().map(|s| s.price).sum::<i64>() + jewelry.iter().map(|j| j.price).sum::<i64>()
}

/// Apply `coupon` to `base`. The final price is rounded and never negative.
pub fn apply_coupon(base: i64, coupon: Option<&Coupon>) -> PriceQuote {
    let Some(coupon) = coupon else {
        return PriceQuote {
            base_price: base,
            discount_amount: 0,
            final_price: base,
        };
    };

    let discount = match coupon.discount_type {
        DiscountType::Percentage => base as f64 * coupon.value / 100.0,
        DiscountType::Fixed => coupon.value,
    };
    let final_price = (base as f64 - discount).max(0.0).round() as i64;

    PriceQuote {
        base_price: base,
        discount_amount: base - final_price,
        final_price,
    }
}

pub fn quote(services: &[Service], jewelry: &[JewelryItem], coupon: Option<&Coupon>) -> PriceQuote {
    apply_coupon(base_price(services, jewelry), coupon)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ServiceCategory;

    pub(crate) fn service(id: i64, price: i64, duration_min: i64) -> Service {
        Service {
            id,
            name: format!("Service {}", id),
            description: String::new(),
            price,
            duration_min,
            category: ServiceCategory::Ear,
            pain_level: 3,
            is_active: true,
            sort_order: id,
        }
    }

    pub(crate) fn jewelry(id: i64, price: i64, in_stock: bool) -> JewelryItem {
        JewelryItem {
            id,
            name: format!("Stud {}", id),
            price,
            category: "stud".into(),
            in_stock,
            image_url: None,
        }
    }

    pub(crate) fn coupon(code: &str, discount_type: DiscountType, value: f64) -> Coupon {
        Coupon {
            id: 1,
            code: code.into(),
            discount_type,
            value,
            min_order_amount: 0,
            is_active: true,
            max_uses: 0,
            used_count: 0,
        }
    }

    #[test]
    fn test_base_price_sums_services_and_jewelry() {
        let services = vec![service(1, 120, 30), service(2, 80, 45)];
        let items = vec![jewelry(10, 60, true)];
        assert_eq!(base_price(&services, &items), 260);
    }

    #[test]
    fn test_no_coupon_keeps_base() {
        let q = quote(&[service(1, 150, 30)], &[], None);
        assert_eq!(q, PriceQuote { base_price: 150, discount_amount: 0, final_price: 150 });
    }

    #[test]
    fn test_percentage_coupon() {
        let c = coupon("LUCK10", DiscountType::Percentage, 10.0);
        let q = apply_coupon(100, Some(&c));
        assert_eq!(q.final_price, 90);
        assert_eq!(q.discount_amount, 10);
    }

    #[test]
    fn test_percentage_rounds_final_price() {
        let c = coupon("P15", DiscountType::Percentage, 15.0);
        // 95 * 0.85 = 80.75
        let q = apply_coupon(95, Some(&c));
        assert_eq!(q.final_price, 81);
        assert_eq!(q.discount_amount, 14);
    }

    #[test]
    fn test_fixed_coupon() {
        let c = coupon("MINUS30", DiscountType::Fixed, 30.0);
        let q = apply_coupon(200, Some(&c));
        assert_eq!(q.final_price, 170);
        assert_eq!(q.discount_amount, 30);
    }

    #[test]
    fn test_fixed_coupon_larger_than_base_clamps_at_zero() {
        let c = coupon("BIG", DiscountType::Fixed, 500.0);
        let q = apply_coupon(120, Some(&c));
        assert_eq!(q.final_price, 0);
        assert_eq!(q.discount_amount, 120);
    }

    #[test]
    fn test_percentage_over_hundred_clamps_at_zero() {
        let c = coupon("WEIRD", DiscountType::Percentage, 150.0);
        let q = apply_coupon(80, Some(&c));
        assert_eq!(q.final_price, 0);
        assert_eq!(q.discount_amount, 80);
    }

    #[test]
    fn test_empty_selection_is_free() {
        let q = quote(&[], &[], None);
        assert_eq!(q, PriceQuote::default());
    }
}
