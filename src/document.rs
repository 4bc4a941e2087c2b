use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::util::{read_json, write_json_pretty};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub body: Vec<Block>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub header: Vec<Block>,
    #[serde(default)]
    pub footer: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default)]
    pub runs: Vec<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub format: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Body,
    Header,
    Footer,
}

impl Part {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::Header => "header",
            Self::Footer => "footer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub table_idx: usize,
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub part: Part,
    pub section_idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellCoord>,
    pub paragraph_idx: usize,
}

impl Location {
    pub fn col(&self) -> Option<usize> {
        self.cells.last().map(|coord| coord.col)
    }

    pub fn in_table(&self) -> bool {
        !self.cells.is_empty()
    }

    pub fn table_address(&self) -> Option<TableAddress> {
        let (innermost, outer) = self.cells.split_last()?;
        Some(TableAddress {
            part: self.part,
            section_idx: self.section_idx,
            cells: outer.to_vec(),
            table_idx: innermost.table_idx,
        })
    }

    pub fn section_key(&self) -> SectionKey {
        SectionKey {
            part: self.part,
            section_idx: self.section_idx,
            table_idx: self.cells.first().map(|coord| coord.table_idx),
        }
    }

    pub fn block_key(&self) -> (Part, Option<usize>, Vec<CellCoord>) {
        (self.part, self.section_idx, self.cells.clone())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.part.as_str())?;
        if let Some(section_idx) = self.section_idx {
            write!(f, "/s{section_idx}")?;
        }
        for coord in &self.cells {
            write!(f, "/t{}r{}c{}", coord.table_idx, coord.row, coord.col)?;
        }
        write!(f, "/p{}", self.paragraph_idx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectionKey {
    pub part: Part,
    pub section_idx: Option<usize>,
    pub table_idx: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableAddress {
    pub part: Part,
    pub section_idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellCoord>,
    pub table_idx: usize,
}

impl Paragraph {
    pub fn from_text(text: &str) -> Self {
        Self {
            style: None,
            runs: vec![Run {
                text: text.to_string(),
                format: BTreeMap::new(),
            }],
            text: None,
        }
    }

    #[cfg(test)]
    pub fn from_runs(runs: &[&str]) -> Self {
        Self {
            style: None,
            runs: runs
                .iter()
                .map(|text| Run {
                    text: (*text).to_string(),
                    format: BTreeMap::new(),
                })
                .collect(),
            text: None,
        }
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    pub fn styled_sibling(&self, text: &str) -> Self {
        let format = self
            .runs
            .first()
            .map(|run| run.format.clone())
            .unwrap_or_default();
        Self {
            style: self.style.clone(),
            runs: vec![Run {
                text: text.to_string(),
                format,
            }],
            text: None,
        }
    }
}

impl Cell {
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Paragraph(paragraph) => parts.push(paragraph.text()),
                Block::Table(table) => {
                    for row in &table.rows {
                        for cell in &row.cells {
                            parts.push(cell.text());
                        }
                    }
                }
            }
        }
        parts.join("\n").trim().to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|block| match block {
            Block::Paragraph(paragraph) => {
                paragraph.text().trim().is_empty()
                    && paragraph
                        .text
                        .as_deref()
                        .map(|text| text.trim().is_empty())
                        .unwrap_or(true)
            }
            Block::Table(_) => false,
        })
    }

    pub fn set_text_preserving_format(&mut self, value: &str) {
        let mut written = false;
        for block in &mut self.blocks {
            let Block::Paragraph(paragraph) = block else {
                continue;
            };
            if written {
                for run in &mut paragraph.runs {
                    run.text.clear();
                }
                continue;
            }
            if paragraph.runs.is_empty() {
                paragraph.runs.push(Run::default());
            }
            for (index, run) in paragraph.runs.iter_mut().enumerate() {
                if index == 0 {
                    run.text = value.to_string();
                } else {
                    run.text.clear();
                }
            }
            written = true;
        }
        if !written {
            self.blocks.push(Block::Paragraph(Paragraph::from_text(value)));
        }
    }
}

impl Row {
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }
}

impl Table {
    pub fn append_blank_row(&mut self, template: usize) -> Option<usize> {
        let mut row = self.rows.get(template)?.clone();
        for cell in &mut row.cells {
            clear_blocks(&mut cell.blocks);
        }
        self.rows.push(row);
        Some(self.rows.len() - 1)
    }
}

fn clear_blocks(blocks: &mut [Block]) {
    for block in blocks {
        match block {
            Block::Paragraph(paragraph) => {
                for run in &mut paragraph.runs {
                    run.text.clear();
                }
            }
            Block::Table(table) => {
                for row in &mut table.rows {
                    for cell in &mut row.cells {
                        clear_blocks(&mut cell.blocks);
                    }
                }
            }
        }
    }
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, self)
    }

    pub fn part_blocks(&self, part: Part, section_idx: Option<usize>) -> Option<&Vec<Block>> {
        match part {
            Part::Body => Some(&self.body),
            Part::Header => section_idx
                .and_then(|idx| self.sections.get(idx))
                .map(|section| &section.header),
            Part::Footer => section_idx
                .and_then(|idx| self.sections.get(idx))
                .map(|section| &section.footer),
        }
    }

    fn part_blocks_mut(
        &mut self,
        part: Part,
        section_idx: Option<usize>,
    ) -> Option<&mut Vec<Block>> {
        match part {
            Part::Body => Some(&mut self.body),
            Part::Header => section_idx
                .and_then(|idx| self.sections.get_mut(idx))
                .map(|section| &mut section.header),
            Part::Footer => section_idx
                .and_then(|idx| self.sections.get_mut(idx))
                .map(|section| &mut section.footer),
        }
    }

    fn blocks_at(
        &self,
        part: Part,
        section_idx: Option<usize>,
        cells: &[CellCoord],
    ) -> Option<&Vec<Block>> {
        let mut blocks = self.part_blocks(part, section_idx)?;
        for coord in cells {
            let table = nth_table(blocks, coord.table_idx)?;
            blocks = &table.rows.get(coord.row)?.cells.get(coord.col)?.blocks;
        }
        Some(blocks)
    }

    fn blocks_at_mut(
        &mut self,
        part: Part,
        section_idx: Option<usize>,
        cells: &[CellCoord],
    ) -> Option<&mut Vec<Block>> {
        let mut blocks = self.part_blocks_mut(part, section_idx)?;
        for coord in cells {
            let table = nth_table_mut(blocks, coord.table_idx)?;
            blocks = &mut table
                .rows
                .get_mut(coord.row)?
                .cells
                .get_mut(coord.col)?
                .blocks;
        }
        Some(blocks)
    }

    pub fn paragraph(&self, location: &Location) -> Option<&Paragraph> {
        let blocks = self.blocks_at(location.part, location.section_idx, &location.cells)?;
        blocks
            .iter()
            .filter_map(|block| match block {
                Block::Paragraph(paragraph) => Some(paragraph),
                Block::Table(_) => None,
            })
            .nth(location.paragraph_idx)
    }

    pub fn paragraph_mut(&mut self, location: &Location) -> Option<&mut Paragraph> {
        let blocks = self.blocks_at_mut(location.part, location.section_idx, &location.cells)?;
        blocks
            .iter_mut()
            .filter_map(|block| match block {
                Block::Paragraph(paragraph) => Some(paragraph),
                Block::Table(_) => None,
            })
            .nth(location.paragraph_idx)
    }

    pub fn cell_paragraph_mut(&mut self, location: &Location) -> Option<&mut Paragraph> {
        let blocks = self.blocks_at_mut(location.part, location.section_idx, &location.cells)?;
        let has_paragraph = blocks
            .iter()
            .any(|block| matches!(block, Block::Paragraph(_)));
        if !has_paragraph && location.paragraph_idx == 0 && !location.cells.is_empty() {
            blocks.insert(0, Block::Paragraph(Paragraph::default()));
        }
        self.paragraph_mut(location)
    }

    pub fn insert_paragraphs_after(
        &mut self,
        location: &Location,
        paragraphs: Vec<Paragraph>,
    ) -> bool {
        let Some(blocks) =
            self.blocks_at_mut(location.part, location.section_idx, &location.cells)
        else {
            return false;
        };

        let position = blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| matches!(block, Block::Paragraph(_)))
            .map(|(index, _)| index)
            .nth(location.paragraph_idx);
        let Some(position) = position else {
            return false;
        };

        for (offset, paragraph) in paragraphs.into_iter().enumerate() {
            blocks.insert(position + 1 + offset, Block::Paragraph(paragraph));
        }
        true
    }

    pub fn table(&self, address: &TableAddress) -> Option<&Table> {
        let blocks = self.blocks_at(address.part, address.section_idx, &address.cells)?;
        nth_table(blocks, address.table_idx)
    }

    pub fn table_mut(&mut self, address: &TableAddress) -> Option<&mut Table> {
        let blocks = self.blocks_at_mut(address.part, address.section_idx, &address.cells)?;
        nth_table_mut(blocks, address.table_idx)
    }
}

fn nth_table(blocks: &[Block], index: usize) -> Option<&Table> {
    blocks
        .iter()
        .filter_map(|block| match block {
            Block::Table(table) => Some(table),
            Block::Paragraph(_) => None,
        })
        .nth(index)
}

fn nth_table_mut(blocks: &mut [Block], index: usize) -> Option<&mut Table> {
    blocks
        .iter_mut()
        .filter_map(|block| match block {
            Block::Table(table) => Some(table),
            Block::Paragraph(_) => None,
        })
        .nth(index)
}
