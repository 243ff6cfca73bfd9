//! Time-keyed summation of forecasts across configurations.
//!
//! Each installation yields watts per provider timestamp; the service stores
//! the sum over all installations. Summation is commutative, so the order in
//! which configurations are merged never changes the result.

use tracing::debug;

use crate::model::WattsByTimestamp;

/// Adds every entry of `incoming` into `combined` and returns it.
///
/// Keys absent from `combined` are inserted as-is; shared keys are summed.
/// The sum saturates at `i32::MAX`, far above any real installation.
pub fn merge(mut combined: WattsByTimestamp, incoming: &WattsByTimestamp) -> WattsByTimestamp {
    for (time, &watt) in incoming {
        match combined.get_mut(time) {
            Some(sum) => {
                let total = sum.saturating_add(watt);
                debug!(time = %time, watt, total, "summing forecast entry");
                *sum = total;
            }
            None => {
                debug!(time = %time, watt, "new forecast entry");
                combined.insert(time.clone(), watt);
            }
        }
    }
    combined
}

/// Folds any number of per-configuration mappings into one, starting empty.
pub fn consolidate<'a, I>(mappings: I) -> WattsByTimestamp
where
    I: IntoIterator<Item = &'a WattsByTimestamp>,
{
    mappings
        .into_iter()
        .fold(WattsByTimestamp::new(), |combined, incoming| merge(combined, incoming))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
