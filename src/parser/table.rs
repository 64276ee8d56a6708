use scraper::ElementRef;

use super::{clean_text, selector};

/// Upper bound browsers apply to `colspan`.
const MAX_COLSPAN: usize = 1000;

/// A stats table flattened to its last header row and string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub id: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Multi-row headers ("Batting" spanning the stat columns) collapse to the
    /// last row. Rows from `tbody` and `tfoot` are kept in document order,
    /// including repeated in-body header rows; callers filter those.
    pub fn from_element(table: ElementRef) -> Table {
        let tr = selector("tr");
        let mut head_rows = Vec::new();
        let mut other_rows = Vec::new();

        for row in table.select(&tr) {
            let section = row
                .parent()
                .and_then(ElementRef::wrap)
                .map(|p| p.value().name().to_string())
                .unwrap_or_default();
            if section == "thead" {
                head_rows.push(row);
            } else {
                other_rows.push(row);
            }
        }

        let headers = match head_rows.last() {
            Some(row) => cells(*row),
            // No thead: an all-<th> first row is the header.
            None if other_rows.first().is_some_and(|r| is_header_row(*r)) => {
                cells(other_rows.remove(0))
            }
            None => Vec::new(),
        };

        let width = headers.len();
        let rows = other_rows
            .into_iter()
            .map(|row| {
                let mut c = cells(row);
                if c.len() < width {
                    c.resize(width, String::new());
                }
                c
            })
            .collect();

        Table {
            id: table.value().id().map(str::to_string),
            headers,
            rows,
        }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// First header found among layout aliases (`Tm` vs `Team`, ...).
    pub fn column_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.column(n))
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |cells| Record {
            headers: &self.headers,
            cells,
        })
    }
}

/// One body row viewed through the table's headers.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    headers: &'a [String],
    cells: &'a [String],
}

impl<'a> Record<'a> {
    /// Cell text, with empty cells reported as missing.
    pub fn get(&self, idx: usize) -> Option<&'a str> {
        self.cells
            .get(idx)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.headers
            .iter()
            .zip(self.cells.iter())
            .map(|(h, c)| (h.as_str(), c.as_str()))
    }
}

fn cells(row: ElementRef) -> Vec<String> {
    let mut out = Vec::new();
    for cell in row.children().filter_map(ElementRef::wrap) {
        if !matches!(cell.value().name(), "th" | "td") {
            continue;
        }
        out.push(clean_text(&cell.text().collect::<String>()));
        let span = cell
            .value()
            .attr("colspan")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1)
            .min(MAX_COLSPAN);
        for _ in 1..span {
            out.push(String::new());
        }
    }
    out
}

fn is_header_row(row: ElementRef) -> bool {
    let mut any = false;
    for cell in row.children().filter_map(ElementRef::wrap) {
        match cell.value().name() {
            "th" => any = true,
            "td" => return false,
            _ => {}
        }
    }
    any
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn first_table(html: &str) -> Table {
        let doc = Html::parse_document(html);
        let table = doc.select(&selector("table")).next().unwrap();
        Table::from_element(table)
    }

    #[test]
    fn last_header_row_wins() {
        let t = first_table(
            r#"<table id="players_advanced_batting">
                 <thead>
                   <tr><th colspan="2"></th><th colspan="2">Batting</th></tr>
                   <tr><th>Season</th><th>Age</th><th>PA</th><th>rOBA</th></tr>
                 </thead>
                 <tbody>
                   <tr><th>2015</th><td>24</td><td>140</td><td>.310</td></tr>
                 </tbody>
               </table>"#,
        );
        assert_eq!(t.id.as_deref(), Some("players_advanced_batting"));
        assert_eq!(t.headers, vec!["Season", "Age", "PA", "rOBA"]);
        assert_eq!(t.rows, vec![vec!["2015", "24", "140", ".310"]]);
        assert_eq!(t.column("rOBA"), Some(3));
    }

    #[test]
    fn header_without_thead() {
        let t = first_table(
            "<table><tr><th>Year</th><th>Tm</th></tr><tr><td>2012</td><td>Akron</td></tr></table>",
        );
        assert_eq!(t.headers, vec!["Year", "Tm"]);
        assert_eq!(t.rows.len(), 1);
    }

    #[test]
    fn footer_rows_kept_and_short_rows_padded() {
        let t = first_table(
            r#"<table><thead><tr><th>Name</th><th>Pos</th><th>AB</th></tr></thead>
               <tbody><tr><td colspan="3"></td></tr><tr><td>A</td><td>2B</td><td>150</td></tr></tbody>
               <tfoot><tr><td>Team Totals</td></tr></tfoot></table>"#,
        );
        assert_eq!(t.rows.len(), 3);
        assert_eq!(t.rows[2], vec!["Team Totals", "", ""]);
        let rec = t.records().nth(2).unwrap();
        assert_eq!(rec.get(0), Some("Team Totals"));
        assert_eq!(rec.get(1), None);
    }

    #[test]
    fn column_aliases() {
        let t = Table {
            headers: vec!["Year".into(), "Team".into(), "Level".into()],
            ..Table::default()
        };
        assert_eq!(t.column_any(&["Tm", "Team"]), Some(1));
        assert_eq!(t.column_any(&["Lev", "Level"]), Some(2));
        assert_eq!(t.column_any(&["Age"]), None);
    }

    #[test]
    fn oversized_colspan_is_clamped() {
        let t = first_table(
            r#"<table><thead><tr><th colspan="4000000000">Batting</th></tr></thead>
               <tbody><tr><td>1</td></tr></tbody></table>"#,
        );
        assert_eq!(t.headers.len(), MAX_COLSPAN);
        assert_eq!(t.headers[0], "Batting");
        assert_eq!(t.rows[0].len(), MAX_COLSPAN);
    }
}
