/// Sensor columns per frame.
pub const WIDTH: usize = 32;
/// Sensor rows per frame.
pub const HEIGHT: usize = 24;
/// Cells in one frame (`WIDTH * HEIGHT`).
pub const CELL_COUNT: usize = WIDTH * HEIGHT;
/// Shortest possible record: single-digit fields, separators and the delimiter.
pub const MIN_RECORD_BYTES: usize = CELL_COUNT * 2;

const SEPARATOR: char = ',';
/// Longest field text kept in an `InvalidField` error.
const MAX_FIELD_ECHO: usize = 16;

/// One complete thermal image: `HEIGHT` rows of `WIDTH` temperatures, row-major.
///
/// A frame always holds exactly `CELL_COUNT` cells; there is no partially
/// filled frame. The wire format is one text record per frame:
///
///   `t0,t1,...,t767\n`
///
/// where `t{r*WIDTH + c}` is the reading at row `r`, column `c`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalFrame {
    cells: Vec<f32>,
}

impl ThermalFrame {
    /// The all-zero frame shown before any reading has arrived.
    pub fn zeroed() -> Self {
        Self {
            cells: vec![0.0; CELL_COUNT],
        }
    }

    /// Build a frame from row-major cells. Fails unless exactly `CELL_COUNT` are given.
    pub fn from_cells(cells: Vec<f32>) -> Result<Self, FrameError> {
        if cells.len() != CELL_COUNT {
            return Err(FrameError::FieldCount {
                got: cells.len(),
                expected: CELL_COUNT,
            });
        }
        Ok(Self { cells })
    }

    // -- Parsing ----------------------------------------------------------------

    /// Decode a raw record and parse it. Byte sequences that are not valid
    /// UTF-8 are dropped, so line noise only costs the frame when it lands
    /// inside a number's digits.
    pub fn parse_record(raw: &[u8]) -> Result<Self, FrameError> {
        let text: String = raw.utf8_chunks().map(|chunk| chunk.valid()).collect();
        Self::parse_text(&text)
    }

    /// Parse one comma-separated record of `CELL_COUNT` floats.
    ///
    /// Surrounding whitespace (including the line terminator) is ignored, as
    /// is whitespace around each field.
    pub fn parse_text(text: &str) -> Result<Self, FrameError> {
        let text = text.trim();
        if !text.contains(SEPARATOR) {
            return Err(FrameError::MissingSeparator);
        }

        let fields: Vec<&str> = text.split(SEPARATOR).collect();
        if fields.len() != CELL_COUNT {
            return Err(FrameError::FieldCount {
                got: fields.len(),
                expected: CELL_COUNT,
            });
        }

        let mut cells = Vec::with_capacity(CELL_COUNT);
        for (index, field) in fields.iter().enumerate() {
            let field = field.trim();
            let value = field.parse::<f32>().map_err(|_| FrameError::InvalidField {
                index,
                value: field.chars().take(MAX_FIELD_ECHO).collect(),
            })?;
            cells.push(value);
        }
        Ok(Self { cells })
    }

    // -- Accessors --------------------------------------------------------------

    /// Reading at `(row, col)`, or `None` when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= HEIGHT || col >= WIDTH {
            return None;
        }
        Some(self.cells[row * WIDTH + col])
    }

    /// Iterate over the `HEIGHT` rows, each `WIDTH` cells long.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.cells.chunks_exact(WIDTH)
    }

    /// The flattened row-major cells.
    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    /// Hottest reading. NaN cells are ignored; an all-NaN frame yields NaN.
    pub fn max(&self) -> f32 {
        self.cells.iter().copied().fold(f32::NAN, f32::max)
    }

    /// Coldest reading. NaN cells are ignored; an all-NaN frame yields NaN.
    pub fn min(&self) -> f32 {
        self.cells.iter().copied().fold(f32::NAN, f32::min)
    }
}

impl Default for ThermalFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("record has no field separator")]
    MissingSeparator,
    #[error("record has {got} fields, expected {expected}")]
    FieldCount { got: usize, expected: usize },
    #[error("field {index} is not a number: {value:?}")]
    InvalidField { index: usize, value: String },
}
