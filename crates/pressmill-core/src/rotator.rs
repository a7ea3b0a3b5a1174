use crate::config::Product;
use crate::error::{PressmillError, Result};

/// Pick the product at `cursor` and return it with the cursor for the next
/// cycle. Strict round-robin in configured order. A cursor saved under a
/// longer portfolio wraps onto the current one.
pub fn next(portfolio: &[Product], cursor: usize) -> Result<(&Product, usize)> {
    if portfolio.is_empty() {
        return Err(PressmillError::EmptyPortfolio);
    }
    let index = cursor % portfolio.len();
    Ok((&portfolio[index], (index + 1) % portfolio.len()))
}
