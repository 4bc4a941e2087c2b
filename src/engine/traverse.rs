use serde::Serialize;

use crate::document::{Block, CellCoord, Document, Location, Part, Table};

#[derive(Debug, Clone, Serialize)]
pub struct TextContainer {
    pub location: Location,
    pub runs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_cell_text: Option<String>,
    pub cell_empty: bool,
}

impl TextContainer {
    pub fn text(&self) -> String {
        self.runs.concat()
    }
}

pub fn traverse(document: &Document) -> Vec<TextContainer> {
    let mut out = Vec::new();
    walk_blocks(
        &document.body,
        &Location {
            part: Part::Body,
            section_idx: None,
            cells: Vec::new(),
            paragraph_idx: 0,
        },
        None,
        false,
        &mut out,
    );

    for (section_idx, section) in document.sections.iter().enumerate() {
        for (part, blocks) in [(Part::Header, &section.header), (Part::Footer, &section.footer)] {
            walk_blocks(
                blocks,
                &Location {
                    part,
                    section_idx: Some(section_idx),
                    cells: Vec::new(),
                    paragraph_idx: 0,
                },
                None,
                false,
                &mut out,
            );
        }
    }

    out
}

fn walk_blocks(
    blocks: &[Block],
    base: &Location,
    left_cell_text: Option<&str>,
    cell_empty: bool,
    out: &mut Vec<TextContainer>,
) {
    let mut paragraph_idx = 0;
    let mut table_idx = 0;

    for block in blocks {
        match block {
            Block::Paragraph(paragraph) => {
                out.push(TextContainer {
                    location: Location {
                        paragraph_idx,
                        ..base.clone()
                    },
                    runs: paragraph.runs.iter().map(|run| run.text.clone()).collect(),
                    declared_text: paragraph.text.clone(),
                    left_cell_text: left_cell_text.map(ToOwned::to_owned),
                    cell_empty,
                });
                paragraph_idx += 1;
            }
            Block::Table(table) => {
                walk_table(table, base, table_idx, out);
                table_idx += 1;
            }
        }
    }

    // Cells without any paragraph still surface so missing data shows up.
    if blocks.is_empty() && base.in_table() {
        out.push(TextContainer {
            location: Location {
                paragraph_idx: 0,
                ..base.clone()
            },
            runs: Vec::new(),
            declared_text: None,
            left_cell_text: left_cell_text.map(ToOwned::to_owned),
            cell_empty,
        });
    }
}

fn walk_table(table: &Table, base: &Location, table_idx: usize, out: &mut Vec<TextContainer>) {
    for (row_idx, row) in table.rows.iter().enumerate() {
        for (col_idx, cell) in row.cells.iter().enumerate() {
            let mut cells = base.cells.clone();
            cells.push(CellCoord {
                table_idx,
                row: row_idx,
                col: col_idx,
            });
            let cell_base = Location {
                part: base.part,
                section_idx: base.section_idx,
                cells,
                paragraph_idx: 0,
            };
            let left_text = col_idx
                .checked_sub(1)
                .and_then(|left| row.cells.get(left))
                .map(|left| left.text())
                .filter(|text| !text.is_empty());
            walk_blocks(
                &cell.blocks,
                &cell_base,
                left_text.as_deref(),
                cell.is_empty(),
                out,
            );
        }
    }
}
