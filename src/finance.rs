//! Annuities and discounting of investment costs.

/// Present value of a payment of 1 at the end of each of the next `years` years
pub fn present_value_factor(years: u32, interest_rate: f64) -> f64 {
    if interest_rate == 0.0 {
        return f64::from(years);
    }
    (1.0 - discount_factor(interest_rate, years)) / interest_rate
}

/// Yearly payment per unit of capital which repays it over `lifetime` years
pub fn annuity_factor(lifetime: u32, interest_rate: f64) -> f64 {
    if lifetime == 0 {
        return 0.0;
    }
    1.0 / present_value_factor(lifetime, interest_rate)
}

/// Equivalent periodical costs (`ep_costs`) of a capital expenditure
pub fn annuity(capex: f64, lifetime: u32, interest_rate: f64) -> f64 {
    capex * annuity_factor(lifetime, interest_rate)
}

/// The factor discounting a payment `years` years into the future to the present
pub fn discount_factor(interest_rate: f64, years: u32) -> f64 {
    (1.0 + interest_rate).powi(-(years as i32))
}

/// The factor converting a period annuity into the value that is still to be paid after the end
/// of the horizon.
///
/// # Arguments
///
/// * `interest_rate` - Rate used for discounting
/// * `end_year` - Year at which the horizon ends, relative to the first period
/// * `remaining_years` - Lifetime left at the end of the horizon
/// * `period_years` - Length of the period the annuity is charged for
pub fn remaining_value_factor(
    interest_rate: f64,
    end_year: u32,
    remaining_years: u32,
    period_years: u32,
) -> f64 {
    if remaining_years == 0 || period_years == 0 {
        return 0.0;
    }
    f64::from(remaining_years) / f64::from(period_years) * discount_factor(interest_rate, end_year)
}
