use std::collections::HashMap;
use std::io::Read;

use serde::Deserialize;

use crate::grading::{self, GradeConversion};

#[derive(Debug, Deserialize)]
struct CsvRow {
    student_code: String,
    course_code: String,
    semester: String,
    score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRow {
    pub line: usize,
    pub student_code: String,
    pub course_code: String,
    pub semester: String,
    pub grade: Option<GradeConversion>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ParsedImport {
    pub rows: Vec<GradeRow>,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub errors: Vec<RowError>,
}

/// Reads a `student_code,course_code,semester,score` sheet. Bad rows are
/// reported by line; a repeated (student, course, semester) keeps the last row.
pub fn parse_grades<R: Read>(reader: R) -> ParsedImport {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut parsed = ParsedImport::default();
    let mut positions: HashMap<(String, String, String), usize> = HashMap::new();

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(err) => {
            parsed.errors.push(RowError {
                line: 1,
                message: format!("unreadable header: {err}"),
            });
            return parsed;
        }
    };

    for result in reader.records() {
        // a quoted field may span lines, so report where the record starts
        let (line, row) = match result {
            Ok(record) => {
                let line = record_line(record.position());
                match record.deserialize::<CsvRow>(Some(&headers)) {
                    Ok(row) => (line, row),
                    Err(err) => {
                        parsed.errors.push(RowError {
                            line,
                            message: format!("unreadable row: {err}"),
                        });
                        continue;
                    }
                }
            }
            Err(err) => {
                parsed.errors.push(RowError {
                    line: record_line(err.position()),
                    message: format!("unreadable row: {err}"),
                });
                continue;
            }
        };

        let mut problems = Vec::new();
        for (field, value) in [
            ("student_code", &row.student_code),
            ("course_code", &row.course_code),
            ("semester", &row.semester),
        ] {
            if value.is_empty() {
                problems.push(format!("{field} is required"));
            }
        }
        let grade = match row.score.map(grading::convert).transpose() {
            Ok(grade) => grade,
            Err(err) => {
                problems.push(err.to_string());
                None
            }
        };
        if !problems.is_empty() {
            parsed.errors.push(RowError {
                line,
                message: problems.join("; "),
            });
            continue;
        }

        let key = (
            row.student_code.clone(),
            row.course_code.clone(),
            row.semester.clone(),
        );
        let grade_row = GradeRow {
            line,
            student_code: row.student_code,
            course_code: row.course_code,
            semester: row.semester,
            grade,
        };
        match positions.get(&key) {
            Some(&position) => parsed.rows[position] = grade_row,
            None => {
                positions.insert(key, parsed.rows.len());
                parsed.rows.push(grade_row);
            }
        }
    }

    parsed
}

fn record_line(position: Option<&csv::Position>) -> usize {
    position.map_or(0, |position| position.line() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_valid_rows_and_blank_scores() {
        let sheet = "student_code,course_code,semester,score\n\
                     SV001,MATH1,2024-1,8.6\n\
                     SV002,MATH1,2024-1,\n";
        let parsed = parse_grades(sheet.as_bytes());
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].grade.map(|g| g.letter), Some("A"));
        assert_eq!(parsed.rows[1].grade, None);
    }

    #[test]
    fn collects_errors_per_line_without_stopping() {
        let sheet = "student_code,course_code,semester,score\n\
                     SV001,MATH1,2024-1,11\n\
                     ,MATH1,2024-1,5\n\
                     SV003,MATH1,2024-1,abc\n\
                     SV004,MATH1,2024-1,6.5\n";
        let parsed = parse_grades(sheet.as_bytes());
        let lines: Vec<usize> = parsed.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert!(parsed.errors[1].message.contains("student_code is required"));
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].student_code, "SV004");
    }

    #[test]
    fn repeated_key_keeps_last_row() {
        let sheet = "student_code,course_code,semester,score\n\
                     SV001,MATH1,2024-1,3.0\n\
                     SV001,PHYS1,2024-1,7.0\n\
                     SV001,MATH1,2024-1,6.0\n";
        let parsed = parse_grades(sheet.as_bytes());
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].course_code, "MATH1");
        assert_eq!(parsed.rows[0].line, 4);
        assert_eq!(parsed.rows[0].grade.map(|g| g.score), Some(6.0));
    }

    #[test]
    fn multi_line_fields_keep_physical_line_numbers() {
        let sheet = "student_code,course_code,semester,score\n\
                     SV001,\"MATH\n1\",2024-1,5\n\
                     SV002,MATH1,2024-1,abc\n";
        let parsed = parse_grades(sheet.as_bytes());
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].line, 2);
        assert_eq!(parsed.rows[0].course_code, "MATH\n1");
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].line, 4);
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "student_code,course_code,semester,score\n SV001 , MATH1 , 2024-1 , 4.0\n").unwrap();
        let parsed = parse_grades(std::fs::File::open(file.path()).unwrap());
        assert_eq!(parsed.rows[0].student_code, "SV001");
        assert_eq!(parsed.rows[0].grade.map(|g| g.passed), Some(true));
    }
}
