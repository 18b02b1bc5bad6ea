//! Hardcoded per-appliance-type behavior tables
//!
//! Type names are matched case-insensitively. The Italian names are the
//! device types the environment editor ships with; the English names come
//! from the appliance reference sheet.

/// Baseline pattern values for a known appliance type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeProfile {
    pub turn_on_duration: i64,
    pub stabilization_duration: i64,
    pub turn_off_duration: i64,
    pub peak_power: f64,
    pub average_power: f64,
    pub standby_power: f64,
    pub power_factor_range: [f64; 2],
}

const COMPUTER_PROFILE: TypeProfile = TypeProfile {
    turn_on_duration: 30_000,
    stabilization_duration: 3_600_000,
    turn_off_duration: 10_000,
    peak_power: 300.0,
    average_power: 150.0,
    standby_power: 5.0,
    power_factor_range: [0.6, 0.9],
};

/// Full default profile for the built-in device types
pub fn type_profile(device_type: &str) -> Option<TypeProfile> {
    let profile = match device_type.to_lowercase().as_str() {
        "computer" => COMPUTER_PROFILE,
        "split" => TypeProfile {
            turn_on_duration: 60_000,
            stabilization_duration: 7_200_000,
            turn_off_duration: 30_000,
            peak_power: 2000.0,
            average_power: 1500.0,
            standby_power: 10.0,
            power_factor_range: [0.8, 0.95],
        },
        "forno microonde" => TypeProfile {
            turn_on_duration: 5_000,
            stabilization_duration: 300_000,
            turn_off_duration: 2_000,
            peak_power: 1200.0,
            average_power: 1000.0,
            standby_power: 2.0,
            power_factor_range: [0.9, 1.0],
        },
        "cucina a induzione" => TypeProfile {
            turn_on_duration: 10_000,
            stabilization_duration: 1_800_000,
            turn_off_duration: 5_000,
            peak_power: 3000.0,
            average_power: 2000.0,
            standby_power: 0.0,
            power_factor_range: [0.95, 1.0],
        },
        "lampada da tavolo" => TypeProfile {
            turn_on_duration: 1_000,
            stabilization_duration: 14_400_000,
            turn_off_duration: 1_000,
            peak_power: 60.0,
            average_power: 50.0,
            standby_power: 0.0,
            power_factor_range: [0.5, 1.0],
        },
        "luce a soffitto" => TypeProfile {
            turn_on_duration: 1_000,
            stabilization_duration: 18_000_000,
            turn_off_duration: 1_000,
            peak_power: 100.0,
            average_power: 80.0,
            standby_power: 0.0,
            power_factor_range: [0.5, 1.0],
        },
        "stampante" => TypeProfile {
            turn_on_duration: 15_000,
            stabilization_duration: 600_000,
            turn_off_duration: 10_000,
            peak_power: 200.0,
            average_power: 50.0,
            standby_power: 5.0,
            power_factor_range: [0.6, 0.8],
        },
        _ => return None,
    };
    Some(profile)
}

/// Profile for a device type, the computer profile when the type is unknown
pub fn profile_or_fallback(device_type: &str) -> TypeProfile {
    type_profile(device_type).unwrap_or(COMPUTER_PROFILE)
}

/// Typical timings and electrical traits, used when a pattern is seeded from
/// a reference wattage instead of a full profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeTimings {
    pub turn_on_duration: i64,
    pub stabilization_duration: i64,
    pub turn_off_duration: i64,
    pub standby_power: f64,
    pub power_factor_range: [f64; 2],
}

pub fn type_timings(device_type: &str) -> TypeTimings {
    // (turn on, stabilization, turn off, standby, pf min, pf max)
    let (on, stable, off, standby, pf_min, pf_max) = match device_type.to_lowercase().as_str() {
        "computer" => (30_000, 3_600_000, 10_000, 5.0, 0.6, 0.9),
        "split" => (60_000, 7_200_000, 30_000, 10.0, 0.8, 0.95),
        "forno microonde" | "microwave oven" => (5_000, 300_000, 2_000, 2.0, 0.9, 1.0),
        "cucina a induzione" => (10_000, 1_800_000, 5_000, 0.0, 0.95, 1.0),
        "lampada da tavolo" => (1_000, 14_400_000, 1_000, 0.0, 0.5, 1.0),
        "luce a soffitto" => (1_000, 18_000_000, 1_000, 0.0, 0.5, 1.0),
        "stampante" | "printer (laser)" => (15_000, 600_000, 10_000, 5.0, 0.6, 0.8),
        "printer (inkjet)" => (10_000, 600_000, 5_000, 3.0, 0.6, 0.8),
        "television" => (3_000, 10_800_000, 2_000, 1.0, 0.7, 0.9),
        "refrigerator" => (5_000, 86_400_000, 5_000, 0.0, 0.8, 0.95),
        "dishwasher" => (10_000, 3_600_000, 5_000, 1.0, 0.8, 0.95),
        "clothes washer" => (15_000, 2_700_000, 10_000, 1.0, 0.8, 0.95),
        "clothes dryer" => (20_000, 3_600_000, 15_000, 1.0, 0.8, 0.95),
        _ => (10_000, 1_800_000, 5_000, 2.0, 0.7, 0.9),
    };
    TypeTimings {
        turn_on_duration: on,
        stabilization_duration: stable,
        turn_off_duration: off,
        standby_power: standby,
        power_factor_range: [pf_min, pf_max],
    }
}

/// Power ranges used by the local scorer when the reference table has no entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypePowerRange {
    pub peak_range: [f64; 2],
    pub valley_range: [f64; 2],
    pub typical_delta: f64,
    pub power_factor: [f64; 2],
}

pub fn type_power_range(device_type: &str) -> Option<TypePowerRange> {
    let (peak, valley, typical, pf) = match device_type.to_lowercase().as_str() {
        "computer" => ([100.0, 500.0], [50.0, 300.0], 200.0, [0.6, 0.9]),
        "split" => ([800.0, 3000.0], [800.0, 3000.0], 1500.0, [0.8, 0.95]),
        "forno microonde" => ([800.0, 1500.0], [800.0, 1500.0], 1000.0, [0.9, 1.0]),
        "cucina a induzione" => ([1000.0, 3500.0], [1000.0, 3500.0], 2000.0, [0.95, 1.0]),
        "lampada da tavolo" => ([5.0, 100.0], [5.0, 100.0], 25.0, [0.5, 1.0]),
        "luce a soffitto" => ([10.0, 200.0], [10.0, 200.0], 50.0, [0.5, 1.0]),
        "stampante" => ([20.0, 300.0], [5.0, 50.0], 100.0, [0.6, 0.8]),
        _ => return None,
    };
    Some(TypePowerRange {
        peak_range: peak,
        valley_range: valley,
        typical_delta: typical,
        power_factor: pf,
    })
}

/// Hours of the day a device type is typically switched on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UsageWindow {
    /// Inclusive hour range
    WorkHours(u32, u32),
    /// Any of these hours, plus or minus one
    MealTimes(&'static [u32]),
    /// Inclusive hour range
    EveningHours(u32, u32),
}

const MEAL_HOURS: &[u32] = &[7, 9, 12, 14, 19, 21];

impl UsageWindow {
    pub fn matches(&self, hour: u32) -> bool {
        match *self {
            UsageWindow::WorkHours(from, to) | UsageWindow::EveningHours(from, to) => {
                hour >= from && hour <= to
            }
            UsageWindow::MealTimes(hours) => hours.iter().any(|h| hour.abs_diff(*h) <= 1),
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            UsageWindow::WorkHours(..) => 0.1,
            UsageWindow::MealTimes(_) => 0.15,
            UsageWindow::EveningHours(..) => 0.1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UsageWindow::WorkHours(..) => "Work hours usage pattern",
            UsageWindow::MealTimes(_) => "Meal time usage pattern",
            UsageWindow::EveningHours(..) => "Evening usage pattern",
        }
    }
}

/// Usage windows for the device types that have one
pub fn usage_windows(device_type: &str) -> &'static [UsageWindow] {
    const COMPUTER: &[UsageWindow] = &[UsageWindow::WorkHours(8, 22)];
    const COOKING: &[UsageWindow] = &[UsageWindow::MealTimes(MEAL_HOURS)];
    const LAMP: &[UsageWindow] = &[UsageWindow::EveningHours(18, 23)];

    match device_type.to_lowercase().as_str() {
        "computer" => COMPUTER,
        "forno microonde" | "cucina a induzione" => COOKING,
        "lampada da tavolo" => LAMP,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_are_case_insensitive() {
        assert_eq!(type_profile("Split"), type_profile("split"));
        assert!(type_profile("toaster").is_none());
    }

    #[test]
    fn test_timings_default_for_unknown_types() {
        let t = type_timings("toaster");
        assert_eq!(t.turn_on_duration, 10_000);
        assert_eq!(t.stabilization_duration, 1_800_000);
        assert_eq!(t.power_factor_range, [0.7, 0.9]);
        assert_eq!(type_timings("Microwave Oven").turn_off_duration, 2_000);
    }

    #[test]
    fn test_meal_windows() {
        let window = usage_windows("forno microonde")[0];
        assert!(window.matches(8));
        assert!(window.matches(13));
        assert!(!window.matches(16));
        assert!(!window.matches(3));
        assert_eq!(window.score(), 0.15);
    }

    #[test]
    fn test_work_and_evening_windows() {
        let work = usage_windows("computer")[0];
        assert!(work.matches(8) && work.matches(22));
        assert!(!work.matches(23));

        let evening = usage_windows("lampada da tavolo")[0];
        assert!(evening.matches(23));
        assert!(!evening.matches(17));
        assert!(usage_windows("split").is_empty());
    }
}
