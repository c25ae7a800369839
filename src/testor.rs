//! Built-in sample target: adds `to_add` to every element of `value` and sums
//! the result.

use crate::{CallResult, Kwargs};

pub const DEFAULT_TO_ADD: f64 = 1.0;

#[tracing::instrument(skip_all)]
pub fn testor(kwargs: &Kwargs) -> CallResult {
    let values = numbers(kwargs, "value")?;
    let to_add = match kwargs.get("to_add") {
        Some(v) => v
            .as_f64()
            .ok_or_else(|| format!("keyword argument \"to_add\" must be a number, got {v}"))?,
        None => DEFAULT_TO_ADD,
    };
    let total = accumulate(&shifted(&values, to_add));
    tracing::debug!(total, len = values.len(), "testor summed values");
    Ok(())
}

fn numbers(kwargs: &Kwargs, key: &str) -> Result<Vec<f64>, String> {
    let items = kwargs
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("keyword argument \"{key}\" must be a list of numbers"))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| format!("\"{key}\" holds a non-numeric item {v}"))
        })
        .collect()
}

#[tracing::instrument(skip_all)]
fn shifted(values: &[f64], to_add: f64) -> Vec<f64> {
    values.iter().map(|v| v + to_add).collect()
}

#[tracing::instrument(skip_all)]
fn accumulate(values: &[f64]) -> f64 {
    values.iter().sum()
}
