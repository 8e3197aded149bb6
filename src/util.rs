use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a value into a JSON string
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Deserialize a JSON string produced by [`encode_json`]
pub fn decode_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

/// Render rows as a bordered text table with a separator after every row
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let separator = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };

    let format_row = |cells: Vec<&str>| {
        let mut line = String::from("|");
        for (i, width) in widths.iter().enumerate() {
            let cell = cells.get(i).copied().unwrap_or("");
            let padding = width - cell.chars().count();
            line.push(' ');
            line.push_str(cell);
            line.push_str(&" ".repeat(padding + 1));
            line.push('|');
        }
        line.push('\n');
        line
    };

    let mut table = separator.clone();
    table.push_str(&format_row(headers.to_vec()));
    table.push_str(&separator);
    for row in rows {
        table.push_str(&format_row(row.iter().map(String::as_str).collect()));
        table.push_str(&separator);
    }
    table
}
