use std::fmt::{Display, Formatter};

use clap::ValueEnum;
use time::{Date, Duration, Month, PrimitiveDateTime};

use crate::errors::ConfigurationError;
use crate::utils::time::format_store_timestamp;

/// Default tolerance around an explicit `--time` instant.
pub const DEFAULT_INSTANT_BUFFER_MINUTES: f64 = 15.0;

/// Inclusive execution-time range; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<PrimitiveDateTime>,
    pub end: Option<PrimitiveDateTime>,
}

impl TimeWindow {
    #[must_use]
    pub const fn new(start: Option<PrimitiveDateTime>, end: Option<PrimitiveDateTime>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn between(start: PrimitiveDateTime, end: PrimitiveDateTime) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// `[instant - span, instant + span]`.
    pub fn around(instant: PrimitiveDateTime, span: TimeSpan) -> Result<Self, ConfigurationError> {
        Ok(Self::between(
            span.subtract_from(instant)?,
            span.add_to(instant)?,
        ))
    }

    #[must_use]
    pub fn contains(&self, instant: PrimitiveDateTime) -> bool {
        self.start.is_none_or(|start| instant >= start) && self.end.is_none_or(|end| instant <= end)
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let start = self
            .start
            .map_or_else(|| "-inf".to_string(), format_store_timestamp);
        let end = self
            .end
            .map_or_else(|| "+inf".to_string(), format_store_timestamp);
        write!(f, "[{start}, {end}]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    #[default]
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl TimeUnit {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
            Self::Years => "years",
        }
    }

    const fn fixed_seconds(self) -> Option<f64> {
        match self {
            Self::Seconds => Some(1.0),
            Self::Minutes => Some(60.0),
            Self::Hours => Some(3_600.0),
            Self::Days => Some(86_400.0),
            Self::Weeks => Some(604_800.0),
            Self::Months | Self::Years => None,
        }
    }

    const fn months_per_unit(self) -> Option<i64> {
        match self {
            Self::Months => Some(1),
            Self::Years => Some(12),
            _ => None,
        }
    }
}

/// A non-negative amount of a (possibly calendar-aware) unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    amount: f64,
    unit: TimeUnit,
}

impl TimeSpan {
    pub fn new(amount: f64, unit: TimeUnit) -> Result<Self, ConfigurationError> {
        if !amount.is_finite() {
            return Err(ConfigurationError::new(format!(
                "time amount must be a finite number, got {amount}"
            )));
        }
        if amount < 0.0 {
            return Err(ConfigurationError::new(format!(
                "time amount must not be negative, got {amount}"
            )));
        }
        if unit.months_per_unit().is_some() && amount.fract() != 0.0 {
            return Err(ConfigurationError::new(format!(
                "{} only accept whole amounts, got {amount}",
                unit.as_str()
            )));
        }
        Ok(Self { amount, unit })
    }

    #[must_use]
    pub fn amount(self) -> f64 {
        self.amount
    }

    #[must_use]
    pub fn unit(self) -> TimeUnit {
        self.unit
    }

    pub fn subtract_from(self, instant: PrimitiveDateTime) -> Result<PrimitiveDateTime, ConfigurationError> {
        self.shift(instant, -1)
    }

    pub fn add_to(self, instant: PrimitiveDateTime) -> Result<PrimitiveDateTime, ConfigurationError> {
        self.shift(instant, 1)
    }

    fn shift(self, instant: PrimitiveDateTime, sign: i64) -> Result<PrimitiveDateTime, ConfigurationError> {
        let shifted = match (self.unit.fixed_seconds(), self.unit.months_per_unit()) {
            (Some(seconds_per_unit), _) => {
                Duration::checked_seconds_f64(self.amount * seconds_per_unit)
                    .and_then(|duration| {
                        if sign < 0 {
                            instant.checked_sub(duration)
                        } else {
                            instant.checked_add(duration)
                        }
                    })
            }
            (None, Some(months_per_unit)) => {
                // amount is whole, checked in `new`
                let months = (self.amount as i64).saturating_mul(months_per_unit);
                shift_months(instant, months.saturating_mul(sign))
            }
            (None, None) => None,
        };

        shifted.ok_or_else(|| {
            ConfigurationError::new(format!(
                "{self} from {} is outside the supported date range",
                format_store_timestamp(instant)
            ))
        })
    }
}

impl Display for TimeSpan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.as_str())
    }
}

/// Moves by whole calendar months, clamping the day to the target month's length.
fn shift_months(instant: PrimitiveDateTime, months: i64) -> Option<PrimitiveDateTime> {
    let month_index = i64::from(instant.year()) * 12 + i64::from(u8::from(instant.month())) - 1;
    let target = month_index.checked_add(months)?;
    let year = i32::try_from(target.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(target.rem_euclid(12) + 1).ok()?).ok()?;

    let mut day = instant.day();
    let date = loop {
        match Date::from_calendar_date(year, month, day) {
            Ok(date) => break date,
            Err(_) if day > 28 => day -= 1,
            Err(_) => return None,
        }
    };
    Some(PrimitiveDateTime::new(date, instant.time()))
}

/// The time-related user options. At most one of the three families may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeOptions {
    pub instants: Vec<PrimitiveDateTime>,
    pub buffer: Option<f64>,
    pub last: Option<f64>,
    pub after: Option<PrimitiveDateTime>,
    pub before: Option<PrimitiveDateTime>,
    pub unit: TimeUnit,
}

impl TimeOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
            && self.buffer.is_none()
            && self.last.is_none()
            && self.after.is_none()
            && self.before.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeResolution {
    /// OR-combined windows; empty means no time restriction.
    pub windows: Vec<TimeWindow>,
    pub description: Option<String>,
}

/// Turns the user's time options into concrete windows, validating combinations first.
pub fn resolve_time_windows(
    options: &TimeOptions,
    now: PrimitiveDateTime,
) -> Result<TimeResolution, ConfigurationError> {
    let has_instants = !options.instants.is_empty();
    let has_last = options.last.is_some();
    let has_bounds = options.after.is_some() || options.before.is_some();

    let families = [has_instants, has_last, has_bounds]
        .into_iter()
        .filter(|given| *given)
        .count();
    if families > 1 {
        return Err(ConfigurationError::new(
            "only one of --time, --last, or (--after/--before) may be given",
        ));
    }

    if let Some(buffer) = options.buffer {
        if buffer < 0.0 {
            return Err(ConfigurationError::new(format!(
                "--buffer must not be negative, got {buffer}"
            )));
        }
        if !has_instants {
            return Err(ConfigurationError::new(
                "--buffer can only be combined with --time",
            ));
        }
    }

    if has_instants {
        let span = match options.buffer {
            Some(buffer) => TimeSpan::new(buffer, options.unit)?,
            None => TimeSpan::new(DEFAULT_INSTANT_BUFFER_MINUTES, TimeUnit::Minutes)?,
        };
        let windows = options
            .instants
            .iter()
            .map(|instant| TimeWindow::around(*instant, span))
            .collect::<Result<Vec<_>, _>>()?;
        let instants = options
            .instants
            .iter()
            .map(|instant| format_store_timestamp(*instant))
            .collect::<Vec<_>>()
            .join(", ");
        return Ok(TimeResolution {
            windows,
            description: Some(format!("that occurred within {span} of {instants}")),
        });
    }

    if let Some(last) = options.last {
        if last <= 0.0 {
            return Err(ConfigurationError::new(format!(
                "--last must be greater than zero, got {last}"
            )));
        }
        let span = TimeSpan::new(last, options.unit)?;
        return Ok(TimeResolution {
            windows: vec![TimeWindow::between(span.subtract_from(now)?, now)],
            description: Some(format!("that occurred within the last {span}")),
        });
    }

    if has_bounds {
        if let (Some(after), Some(before)) = (options.after, options.before)
            && after > before
        {
            return Err(ConfigurationError::new(format!(
                "--after ({}) must not be later than --before ({})",
                format_store_timestamp(after),
                format_store_timestamp(before)
            )));
        }
        let description = match (options.after, options.before) {
            (Some(after), Some(before)) => format!(
                "executed after {} but before {}",
                format_store_timestamp(after),
                format_store_timestamp(before)
            ),
            (Some(after), None) => format!("executed after {}", format_store_timestamp(after)),
            (None, Some(before)) => format!("executed before {}", format_store_timestamp(before)),
            (None, None) => String::new(),
        };
        return Ok(TimeResolution {
            windows: vec![TimeWindow::new(options.after, options.before)],
            description: Some(description),
        });
    }

    Ok(TimeResolution {
        windows: Vec::new(),
        description: None,
    })
}
