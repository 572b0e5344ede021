use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use uuid::Uuid;

use crate::models::MutationOperation;

#[derive(serde::Deserialize)]
struct CsvRow {
    op: String,
    id: Option<Uuid>,
    name: Option<String>,
    weight: Option<f64>,
}

/// Reads an operations file with header `op,id,name,weight`.
pub fn load_operations(csv_path: &Path) -> anyhow::Result<Vec<MutationOperation>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    parse_operations(file)
}

pub fn parse_operations<R: Read>(source: R) -> anyhow::Result<Vec<MutationOperation>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(source);
    let mut operations = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("line {line}: malformed row"))?;
        operations.push(row_to_operation(row).with_context(|| format!("line {line}"))?);
    }

    Ok(operations)
}

fn row_to_operation(row: CsvRow) -> anyhow::Result<MutationOperation> {
    let name = row.name.filter(|name| !name.is_empty());
    match row.op.to_ascii_lowercase().as_str() {
        "create" => Ok(MutationOperation::Create {
            name: name.context("create needs a name")?,
            weight: row.weight.context("create needs a weight")?,
        }),
        "modify" => Ok(MutationOperation::Modify {
            id: row.id.context("modify needs an id")?,
            name: name.context("modify needs a name")?,
            weight: row.weight.context("modify needs a weight")?,
        }),
        "delete" => Ok(MutationOperation::Delete {
            id: row.id.context("delete needs an id")?,
        }),
        other => bail!("unknown operation '{other}', expected create, modify or delete"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_rows_in_file_order() {
        let csv = "op,id,name,weight\n\
                   delete,6f1c2a8e-5b0d-4c47-9d7e-1f2a3b4c5d6e,,\n\
                   create,,Final exam,4.5\n\
                   modify,a2b3c4d5-e6f7-4a8b-9c0d-1e2f3a4b5c6d,Homework,2.5\n";
        let operations = parse_operations(csv.as_bytes()).unwrap();
        assert_eq!(operations.len(), 3);
        assert!(matches!(operations[0], MutationOperation::Delete { .. }));
        assert_eq!(
            operations[1],
            MutationOperation::Create {
                name: "Final exam".to_string(),
                weight: 4.5
            }
        );
        assert!(matches!(
            &operations[2],
            MutationOperation::Modify { name, weight, .. } if name == "Homework" && *weight == 2.5
        ));
    }

    #[test]
    fn reports_line_of_bad_row() {
        let csv = "op,id,name,weight\ncreate,,Quiz,1\nmodify,,Quiz,2\n";
        let err = parse_operations(csv.as_bytes()).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("line 3"));
        assert!(message.contains("modify needs an id"));
    }

    #[test]
    fn rejects_unknown_operations() {
        let csv = "op,id,name,weight\nrename,,Quiz,1\n";
        let err = parse_operations(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown operation 'rename'"));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "op,id,name,weight").unwrap();
        writeln!(file, "CREATE,,Project,10").unwrap();
        let operations = load_operations(file.path()).unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].weight(), Some(10.0));
    }
}
