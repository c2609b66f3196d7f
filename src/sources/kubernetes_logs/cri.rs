//! Parser for the CRI log format.
//!
//! CRI log format ([documentation][cri_log_format]) is a simple newline-separated text format:
//! `<RFC3339 timestamp> <stdout|stderr> <P|F> <message>`. A `P` tag marks a partial line that
//! continues in the next one from the same file.
//!
//! [cri_log_format]: https://github.com/kubernetes/community/blob/ee2abbf9dbfa4523b414f99a04ddc97bd38c74b2/contributors/design-proposals/node/kubelet-cri-logging.md

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use snafu::{OptionExt, ResultExt, Snafu};

static CRI_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<timestamp>\S+) (?:stdout|stderr) (?P<multiline_tag>[PF])(?::\S*)?(?: (?P<message>.*))?$")
        .expect("CRI pattern is valid")
});

#[derive(Debug, Snafu)]
pub enum CriError {
    #[snafu(display("Line is not in CRI format"))]
    Format,
    #[snafu(display("Invalid CRI timestamp {value:?}: {source}"))]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub struct CriLine<'a> {
    pub timestamp: DateTime<Utc>,
    pub partial: bool,
    pub message: &'a str,
}

pub fn parse(line: &str) -> Result<CriLine<'_>, CriError> {
    let captures = CRI_LINE.captures(line).context(FormatSnafu)?;
    let timestamp = &captures["timestamp"];
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .context(TimestampSnafu { value: timestamp })?
        .with_timezone(&Utc);

    Ok(CriLine {
        timestamp,
        partial: &captures["multiline_tag"] == "P",
        message: captures.name("message").map_or("", |message| message.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 10, 6, 0, 17, 9).unwrap() + chrono::Duration::nanoseconds(669_794_202)
    }

    #[rstest]
    #[case("2016-10-06T00:17:09.669794202Z stdout F The content of the log entry 1", false, "The content of the log entry 1")]
    #[case("2016-10-06T00:17:09.669794202Z stdout P First line of log entry 2", true, "First line of log entry 2")]
    #[case("2016-10-06T00:17:09.669794202Z stderr F Last line of the log entry 2", false, "Last line of the log entry 2")]
    #[case("2016-10-06T00:17:09.669794202Z stdout F ", false, "")]
    #[case("2016-10-06T00:17:09.669794202Z stdout F", false, "")]
    #[case("2016-10-06T00:17:09.669794202Z stdout F  padded stdout F text", false, " padded stdout F text")]
    fn parses_lines(#[case] line: &str, #[case] partial: bool, #[case] message: &str) {
        assert_eq!(
            parse(line).unwrap(),
            CriLine {
                timestamp: ts(),
                partial,
                message,
            }
        );
    }

    #[test]
    fn converts_offsets_to_utc() {
        let line = parse("2016-10-06T02:17:09.669794202+02:00 stdout F x").unwrap();
        assert_eq!(line.timestamp, ts());
    }

    #[rstest]
    #[case("plain text line")]
    #[case("2016-10-06T00:17:09Z stdlog F message")]
    #[case("2016-10-06T00:17:09Z stdout X message")]
    fn rejects_other_formats(#[case] line: &str) {
        assert!(matches!(parse(line), Err(CriError::Format)));
    }

    #[test]
    fn rejects_bad_timestamps() {
        assert!(matches!(
            parse("yesterday stdout F message"),
            Err(CriError::Timestamp { .. })
        ));
    }
}
