use std::fmt;

use serde::Serialize;

use crate::runner::TestOutcome;

/// One executed test as it appears in the batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRecord {
    pub number: usize,
    pub name: String,
    pub passed: bool,
    pub report: String,
}

/// Accumulated results of a batch run.
/// （批次執行的累計結果。）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    requested: usize,
    records: Vec<TestRecord>,
    failures: usize,
    halted: bool,
}

impl BatchSummary {
    pub fn new(requested: usize) -> Self {
        Self {
            requested,
            ..Self::default()
        }
    }

    /// Appends the next test; numbering starts at 1.
    pub fn record(&mut self, name: &str, outcome: &TestOutcome) -> &TestRecord {
        if !outcome.success {
            self.failures += 1;
        }
        self.records.push(TestRecord {
            number: self.records.len() + 1,
            name: name.to_string(),
            passed: outcome.success,
            report: outcome.report.clone(),
        });
        &self.records[self.records.len() - 1]
    }

    pub fn mark_halted(&mut self) {
        self.halted = true;
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn executed(&self) -> usize {
        self.records.len()
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// True when the run stopped before every requested test executed.
    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    /// `"N tests were executed with M failures detected"`, singular for one.
    pub fn closing_line(&self) -> String {
        let tests = match self.executed() {
            1 => "1 test was executed".to_string(),
            n => format!("{n} tests were executed"),
        };
        let failures = match self.failures {
            1 => "1 failure".to_string(),
            n => format!("{n} failures"),
        };
        format!("{tests} with {failures} detected")
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "Test number {}", record.number)?;
            writeln!(f, "Test identifier - {}", record.name)?;
            writeln!(f, "Test execution passed - {}", record.passed)?;
            writeln!(f)?;
        }
        writeln!(f, "{}", self.closing_line())
    }
}
