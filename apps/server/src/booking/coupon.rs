use thiserror::Error;

use super::error::LookupError;
use crate::models::Coupon;
use crate::store::StudioStore;

/// Why a coupon that was looked up cannot be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CouponRejection {
    #[error("invalid coupon")]
    NotFound,
    #[error("coupon is no longer active")]
    Inactive,
    #[error("order must be at least {minimum} to use this coupon")]
    BelowMinimum { minimum: i64 },
    #[error("coupon usage limit reached")]
    Exhausted,
}

/// Business rules for an existing coupon against the current base price.
pub fn check(coupon: &Coupon, base_price: i64) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if base_price < coupon.min_order_amount {
        return Err(CouponRejection::BelowMinimum {
            minimum: coupon.min_order_amount,
        });
    }
    if coupon.max_uses > 0 && coupon.used_count >= coupon.max_uses {
        return Err(CouponRejection::Exhausted);
    }
    Ok(())
}

/// Look `code` up (case-insensitively) and check it.
///
/// The outer error is a failed lookup, which callers must report as
/// "could not verify" rather than as an invalid code.
pub async fn validate(
    store: &dyn StudioStore,
    code: &str,
    base_price: i64,
) -> Result<Result<Coupon, CouponRejection>, LookupError> {
    let code = code.trim();
    if code.is_empty() {
        return Ok(Err(CouponRejection::NotFound));
    }
    let Some(coupon) = store.find_coupon(code).await? else {
        return Ok(Err(CouponRejection::NotFound));
    };
    Ok(check(&coupon, base_price).map(|()| coupon))
}
