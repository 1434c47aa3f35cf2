//! Free-form date parsing behind `#dateformat`.
//!
//! Date recognition is a pluggable collaborator so hosts can wire in a
//! full natural-language parser; the default recognizes the formats that
//! actually occur in dictionary and encyclopedia content.

use time::{Date, Month};

/// A parsed calendar date. Year-less dates are valid input to
/// `#dateformat` and format without a year.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParsedDate {
    /// The year, if one was given.
    pub year: Option<i32>,
    /// The month, 1-based.
    pub month: u8,
    /// The day of month, 1-based.
    pub day: u8,
}

/// A date-parsing collaborator.
pub trait DateParser {
    /// Parses free-form date text, returning `None` when the text is not
    /// recognizably a date.
    fn parse(&self, text: &str) -> Option<ParsedDate>;
}

/// Year used to validate year-less dates; a leap year so February 29
/// passes validation.
const SENTINEL_YEAR: i32 = 2000;

/// The built-in date parser.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDateParser;

impl DateParser for DefaultDateParser {
    fn parse(&self, text: &str) -> Option<ParsedDate> {
        let text = text.trim();

        // ISO: 2009-12-25
        let mut iso = text.splitn(3, '-');
        if let (Some(y), Some(m), Some(d), ) = (iso.next(), iso.next(), iso.next())
            && let (Ok(y), Ok(m), Ok(d)) = (y.parse::<i32>(), m.parse::<u8>(), d.parse::<u8>())
        {
            return validate(Some(y), m, d);
        }

        let words: Vec<&str> = text
            .split([' ', ','])
            .filter(|word| !word.is_empty())
            .collect();
        match words.as_slice() {
            // 25 December 2009
            [day, month, year] if day.chars().all(|c| c.is_ascii_digit()) => validate(
                year.parse().ok(),
                month_number(month)?,
                day.parse().ok()?,
            )
            .filter(|d| d.year.is_some()),
            // December 25, 2009
            [month, day, year] => validate(
                year.parse().ok(),
                month_number(month)?,
                day.parse().ok()?,
            )
            .filter(|d| d.year.is_some()),
            // 25 December (year-less)
            [day, month] if day.chars().all(|c| c.is_ascii_digit()) => {
                validate(None, month_number(month)?, day.parse().ok()?)
            }
            // December 25 (year-less)
            [month, day] => validate(None, month_number(month)?, day.parse().ok()?),
            _ => None,
        }
    }
}

/// Checks that the date is a real calendar date.
fn validate(year: Option<i32>, month: u8, day: u8) -> Option<ParsedDate> {
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year.unwrap_or(SENTINEL_YEAR), month, day).ok()?;
    Some(ParsedDate {
        year,
        month: month as u8,
        day,
    })
}

/// Maps a month name or abbreviation to its 1-based number.
fn month_number(name: &str) -> Option<u8> {
    const MONTHS: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|month| *month == name || (name.len() == 3 && month.starts_with(&name)))
        .map(|index| index as u8 + 1)
}

/// The English name of a 1-based month number.
pub(crate) fn month_name(month: u8) -> &'static str {
    const NAMES: [&str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];
    NAMES
        .get(usize::from(month).wrapping_sub(1))
        .copied()
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_formats() {
        let p = DefaultDateParser;
        let expected = Some(ParsedDate {
            year: Some(2009),
            month: 12,
            day: 25,
        });
        assert_eq!(p.parse("2009-12-25"), expected);
        assert_eq!(p.parse("25 December 2009"), expected);
        assert_eq!(p.parse("December 25, 2009"), expected);
        assert_eq!(p.parse("25 dec 2009"), expected);
    }

    #[test]
    fn yearless_dates() {
        let p = DefaultDateParser;
        let expected = Some(ParsedDate {
            year: None,
            month: 2,
            day: 29,
        });
        assert_eq!(p.parse("29 February"), expected);
        assert_eq!(p.parse("Feb 29"), expected);
    }

    #[test]
    fn rejects_non_dates() {
        let p = DefaultDateParser;
        assert_eq!(p.parse("not a date"), None);
        assert_eq!(p.parse("32 January 2000"), None);
        assert_eq!(p.parse("2009-13-01"), None);
    }
}
