//! Constant-product pricing for binary outcome markets
//!
//! Pure functions over the `(yes, no)` reserve pair. Buying YES with `p`
//! points moves `p` into the NO pool and releases shares from the YES pool so
//! that the product of the reserves stays fixed:
//!
//! ```text
//! shares_out = yes - (yes * no) / (no + p)
//! new reserves = (yes - shares_out, no + p)
//! ```
//!
//! Buying NO is symmetric. The price of YES is the opposing reserve's share
//! of total liquidity, `no / (yes + no)`, so `price_yes + price_no == 1`.
//!
//! Everything here is side-effect free and safe to call from any thread.

use serde::{Deserialize, Serialize};

use crate::{
    error::{CoreError, Result},
    types::Side,
};

/// Relative tolerance the product invariant is held to across a trade
pub const K_TOLERANCE: f64 = 1e-9;

/// Result of quoting a stake against current reserves
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub side: Side,
    pub shares_out: f64,
    pub new_yes: f64,
    pub new_no: f64,
    /// Average price paid per share, `points / shares_out`
    pub avg_price: f64,
}

/// Price of the YES side implied by the reserves
pub fn price_yes(yes: f64, no: f64) -> f64 {
    no / (yes + no)
}

/// Price of the NO side, the complement of `price_yes`
pub fn price_no(yes: f64, no: f64) -> f64 {
    yes / (yes + no)
}

pub fn price(yes: f64, no: f64, side: Side) -> f64 {
    match side {
        Side::Yes => price_yes(yes, no),
        Side::No => price_no(yes, no),
    }
}

/// Quote a market buy of `points` on `side` against reserves `(yes, no)`.
///
/// Fails with `InvalidStake` for a non-positive or non-finite stake and with
/// `InvariantViolation` if either resulting reserve would be non-positive.
/// The algebra cannot produce that for valid inputs, so the check is purely
/// a guard against corrupted reserve state reaching the curve.
pub fn quote(yes: f64, no: f64, side: Side, points: f64) -> Result<Quote> {
    if !points.is_finite() || points <= 0.0 {
        return Err(CoreError::InvalidStake);
    }
    if !yes.is_finite() || !no.is_finite() || yes <= 0.0 || no <= 0.0 {
        return Err(CoreError::InvariantViolation(format!(
            "reserves must be positive and finite, got yes={} no={}",
            yes, no
        )));
    }

    let k = yes * no;
    let (shares_out, new_yes, new_no) = match side {
        Side::Yes => {
            let shares_out = yes - k / (no + points);
            (shares_out, yes - shares_out, no + points)
        }
        Side::No => {
            let shares_out = no - k / (yes + points);
            (shares_out, yes + points, no - shares_out)
        }
    };

    if !shares_out.is_finite() || shares_out <= 0.0 {
        return Err(CoreError::InvariantViolation(format!(
            "trade would issue {} shares",
            shares_out
        )));
    }
    if !new_yes.is_finite() || !new_no.is_finite() || new_yes <= 0.0 || new_no <= 0.0 {
        return Err(CoreError::InvariantViolation(format!(
            "trade would leave reserves yes={} no={}",
            new_yes, new_no
        )));
    }

    Ok(Quote {
        side,
        shares_out,
        new_yes,
        new_no,
        avg_price: points / shares_out,
    })
}
