//! Parsers for scheduler command output
//!
//! Each parser either understands the text completely or hands it back untouched as
//! [Parsed::Malformed] so the caller can log it, nothing is guessed.

use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parsed<T> {
    Parsed(T),
    Malformed(String),
}

impl<T> Parsed<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Parsed::Parsed(value) => Some(value),
            Parsed::Malformed(_) => None,
        }
    }
}

fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Job id from a submission acknowledgement, e.g. `Submitted batch job 123456`
///
/// The pattern's first capture group is the job id.
pub fn parse_submission(pattern: &Regex, stdout: &str) -> Parsed<String> {
    match pattern.captures(stdout).and_then(|c| c.get(1)) {
        Some(id) if !id.as_str().trim().is_empty() => Parsed::Parsed(id.as_str().trim().to_string()),
        _ => Parsed::Malformed(stdout.to_string()),
    }
}

/// State from the live queue (`squeue -h -j <id> -o %T`)
///
/// Empty output means the job has left the queue.
pub fn parse_queue_state(stdout: &str) -> Parsed<Option<String>> {
    match non_empty_lines(stdout).as_slice() {
        [] => Parsed::Parsed(None),
        [line] => match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [state] => Parsed::Parsed(Some(state.to_string())),
            _ => Parsed::Malformed(stdout.to_string()),
        },
        _ => Parsed::Malformed(stdout.to_string()),
    }
}

/// State of `job_id` from accounting history (`sacct -n -P -X -j <id> -o JobID,State`)
///
/// Lines are `|` separated with the job id first and the state second, a trailing `|` (from
/// `-p`) is allowed. Job steps (`123.batch`) are ignored.
pub fn parse_history_state(job_id: &str, stdout: &str) -> Parsed<Option<String>> {
    let lines = non_empty_lines(stdout);
    if lines.is_empty() {
        return Parsed::Parsed(None);
    }

    for line in lines {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < 2 {
            return Parsed::Malformed(stdout.to_string());
        }
        if fields[0] == job_id && !fields[1].is_empty() {
            return Parsed::Parsed(Some(fields[1].to_string()));
        }
    }

    Parsed::Parsed(None)
}

/// Job id of a live job looked up by name (`squeue -h -n <name> -o %i`)
pub fn parse_lookup(stdout: &str) -> Parsed<Option<String>> {
    match non_empty_lines(stdout).as_slice() {
        [] => Parsed::Parsed(None),
        [id] if id.chars().all(|c| c.is_ascii_digit() || c == '_' || c == '.') => {
            Parsed::Parsed(Some(id.to_string()))
        }
        _ => Parsed::Malformed(stdout.to_string()),
    }
}

/// Newest job id recorded under a name in accounting (`sacct -n -X -P --name <name> -o JobID`)
///
/// A name can appear more than once, accounting lists the newest job last.
pub fn parse_history_lookup(stdout: &str) -> Parsed<Option<String>> {
    let lines = non_empty_lines(stdout);
    if lines.iter().all(|id| id.chars().all(|c| c.is_ascii_digit() || c == '_' || c == '.')) {
        return Parsed::Parsed(lines.last().map(|id| id.to_string()));
    }
    Parsed::Malformed(stdout.to_string())
}

/// Wall time in seconds from a SLURM time string, `None` when unlimited
///
/// Accepted: `minutes`, `minutes:seconds`, `hours:minutes:seconds`, `days-hours`,
/// `days-hours:minutes`, `days-hours:minutes:seconds`, `UNLIMITED`/`INFINITE`.
pub fn parse_wall_time(text: &str) -> Parsed<Option<u64>> {
    let value = text.trim();
    if value.eq_ignore_ascii_case("unlimited") || value.eq_ignore_ascii_case("infinite") {
        return Parsed::Parsed(None);
    }
    match wall_time_seconds(value) {
        Some(seconds) => Parsed::Parsed(Some(seconds)),
        None => Parsed::Malformed(text.to_string()),
    }
}

fn wall_time_seconds(value: &str) -> Option<u64> {
    let number = |s: &str| -> Option<u64> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    };

    let (days, rest) = match value.split_once('-') {
        Some((d, rest)) => (Some(number(d)?), rest),
        None => (None, value),
    };
    let parts: Vec<u64> = rest.split(':').map(number).collect::<Option<Vec<u64>>>()?;

    let (h, m, s) = match (days, parts.as_slice()) {
        (None, [m]) => (0, *m, 0),
        (None, [m, s]) => (0, *m, *s),
        (None, [h, m, s]) => (*h, *m, *s),
        (Some(_), [h]) => (*h, 0, 0),
        (Some(_), [h, m]) => (*h, *m, 0),
        (Some(_), [h, m, s]) => (*h, *m, *s),
        _ => return None,
    };
    if s > 59 || (parts.len() > 1 && m > 59) {
        return None;
    }

    days.unwrap_or(0)
        .checked_mul(86_400)?
        .checked_add(h.checked_mul(3_600)?)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission() {
        let pattern = Regex::new(r"Submitted batch job (\d+)").unwrap();
        assert_eq!(parse_submission(&pattern, "Submitted batch job 4815162\n"), Parsed::Parsed("4815162".to_string()));
        assert_eq!(
            parse_submission(&pattern, "sbatch: error: invalid partition specified\n"),
            Parsed::Malformed("sbatch: error: invalid partition specified\n".to_string())
        );
    }

    #[test]
    fn test_parsable_submission() {
        let pattern = Regex::new(r"^\s*(\d+)").unwrap();
        assert_eq!(parse_submission(&pattern, "4815162;cluster\n").ok(), Some("4815162".to_string()));
    }

    #[test]
    fn test_queue_state() {
        assert_eq!(parse_queue_state("RUNNING\n"), Parsed::Parsed(Some("RUNNING".to_string())));
        assert_eq!(parse_queue_state("\n"), Parsed::Parsed(None));
        assert!(matches!(parse_queue_state("RUNNING\nPENDING\n"), Parsed::Malformed(_)));
        assert!(matches!(parse_queue_state("JOBID STATE\n"), Parsed::Malformed(_)));
    }

    #[test]
    fn test_history_state() {
        assert_eq!(
            parse_history_state("42", "42|TIMEOUT\n42.batch|CANCELLED\n"),
            Parsed::Parsed(Some("TIMEOUT".to_string()))
        );
        assert_eq!(parse_history_state("42", "42|COMPLETED|\n"), Parsed::Parsed(Some("COMPLETED".to_string())));
        assert_eq!(
            parse_history_state("42", "42|CANCELLED by 1001\n"),
            Parsed::Parsed(Some("CANCELLED by 1001".to_string()))
        );
        assert_eq!(parse_history_state("42", ""), Parsed::Parsed(None));
        assert_eq!(parse_history_state("42", "41|COMPLETED\n"), Parsed::Parsed(None));
        assert!(matches!(parse_history_state("42", "sacct: error: something\n"), Parsed::Malformed(_)));
    }

    #[test]
    fn test_lookup() {
        assert_eq!(parse_lookup("77\n"), Parsed::Parsed(Some("77".to_string())));
        assert_eq!(parse_lookup(""), Parsed::Parsed(None));
        assert!(matches!(parse_lookup("77\n78\n"), Parsed::Malformed(_)));
    }

    #[test]
    fn test_history_lookup_takes_newest() {
        assert_eq!(parse_history_lookup("77\n78\n"), Parsed::Parsed(Some("78".to_string())));
        assert_eq!(parse_history_lookup("\n"), Parsed::Parsed(None));
        assert!(matches!(parse_history_lookup("sacct: error: Slurmdbd is down\n"), Parsed::Malformed(_)));
    }

    #[test]
    fn test_wall_time() {
        assert_eq!(parse_wall_time("30").ok(), Some(Some(1_800)));
        assert_eq!(parse_wall_time("30:15").ok(), Some(Some(1_815)));
        assert_eq!(parse_wall_time("12:00:00").ok(), Some(Some(43_200)));
        assert_eq!(parse_wall_time("1-00:00:00").ok(), Some(Some(86_400)));
        assert_eq!(parse_wall_time("2-12").ok(), Some(Some(216_000)));
        assert_eq!(parse_wall_time("1-02:30").ok(), Some(Some(95_400)));
        assert_eq!(parse_wall_time("UNLIMITED").ok(), Some(None));
        assert!(matches!(parse_wall_time("12:61:00"), Parsed::Malformed(_)));
        assert!(matches!(parse_wall_time("999999999999999999-00:00:00"), Parsed::Malformed(_)));
        assert!(matches!(parse_wall_time("18446744073709551615"), Parsed::Malformed(_)));
        assert!(matches!(parse_wall_time("soon"), Parsed::Malformed(_)));
        assert!(matches!(parse_wall_time(""), Parsed::Malformed(_)));
    }
}
