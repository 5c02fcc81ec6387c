use fleetwatch_core::error::AppError;
use fleetwatch_core::models::Row;
use scraper::{ElementRef, Html, Selector};

/// Extracts the cell text of every `<tr>` in an HTML fragment.
///
/// Only direct `<td>` children count as cells, so header rows built from
/// `<th>` come back empty and nested tables do not leak cells into their
/// parent row. Cell text is whitespace-normalized.
pub fn parse_table_rows(html: &str) -> Result<Vec<Row>, AppError> {
    let fragment = Html::parse_fragment(html);
    let row_selector = Selector::parse("tr")
        .map_err(|e| AppError::Generic(format!("Invalid row selector: {e}")))?;

    let rows = fragment
        .select(&row_selector)
        .map(|row| {
            row.children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| cell.value().name() == "td")
                .map(|cell| normalize(&cell.text().collect::<Vec<_>>().join(" ")))
                .collect()
        })
        .collect();
    Ok(rows)
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPS_TABLE: &str = r#"
        <div id="divDevicesListInfo">
          <table>
            <tr><th>Target</th><th>IMEI</th></tr>
            <tr><td>Truck 1</td><td> 860001 </td></tr>
            <tr><td><span>Truck</span>
                <b>2</b></td><td>860002</td></tr>
          </table>
        </div>"#;

    #[test]
    fn test_extracts_td_text_per_row() {
        let rows = parse_table_rows(GPS_TABLE).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_empty());
        assert_eq!(rows[1], vec!["Truck 1", "860001"]);
        assert_eq!(rows[2], vec!["Truck 2", "860002"]);
    }

    #[test]
    fn test_nested_table_cells_stay_in_their_row() {
        let html = r#"<table><tr><td>outer<table><tr><td>inner</td></tr></table></td><td>b</td></tr></table>"#;
        let rows = parse_table_rows(html).unwrap();

        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1], vec!["inner"]);
    }

    #[test]
    fn test_no_table_yields_no_rows() {
        let rows = parse_table_rows("<div id=\"divExceptionMessageDivInfo\"></div>").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_empty_cells_are_kept() {
        let rows = parse_table_rows("<table><tr><td></td><td>x</td></tr></table>").unwrap();
        assert_eq!(rows[0], vec!["", "x"]);
    }
}
