use serde::Serialize;

use crate::error::DiagramError;

pub const NUM_BINS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Texel {
    Red,
    Yellow,
    Blue,
}

impl Texel {
    pub const ALL: [Texel; NUM_BINS] = [Texel::Red, Texel::Yellow, Texel::Blue];

    pub fn bin(self) -> usize {
        match self {
            Texel::Red => 0,
            Texel::Yellow => 1,
            Texel::Blue => 2,
        }
    }

    /// Accepts `R`/`Y`/`B` in either case, or the matching colored square emoji.
    pub fn from_char(ch: char) -> Option<Self> {
        match ch {
            'R' | 'r' | '🟥' => Some(Texel::Red),
            'Y' | 'y' | '🟨' => Some(Texel::Yellow),
            'B' | 'b' | '🟦' => Some(Texel::Blue),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Texel::Red => 'R',
            Texel::Yellow => 'Y',
            Texel::Blue => 'B',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Texture {
    width: usize,
    height: usize,
    texels: Vec<Texel>,
}

impl Texture {
    pub fn parse<S: AsRef<str>>(rows: &[S]) -> Result<Self, DiagramError> {
        let mut texels = Vec::new();
        let mut width = None;
        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            let mut row_width = 0;
            for ch in row.chars() {
                // Emoji squares are sometimes followed by a variation selector.
                if ch == '\u{fe0f}' {
                    continue;
                }
                let texel = Texel::from_char(ch).ok_or_else(|| {
                    DiagramError::Texture(format!("row {y} contains unknown texel '{ch}'"))
                })?;
                texels.push(texel);
                row_width += 1;
            }
            match width {
                None if row_width == 0 => {
                    return Err(DiagramError::Texture(format!("row {y} is empty")));
                }
                None => width = Some(row_width),
                Some(expected) if expected != row_width => {
                    return Err(DiagramError::Texture(format!(
                        "row {y} is {row_width} texels wide, expected {expected}"
                    )));
                }
                Some(_) => {}
            }
        }
        let width =
            width.ok_or_else(|| DiagramError::Texture("texture has no rows".to_string()))?;
        Ok(Self {
            width,
            height: rows.len(),
            texels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Texel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.texels.get(y * self.width + x).copied()
    }

    pub fn histogram(&self) -> [u32; NUM_BINS] {
        let mut bins = [0; NUM_BINS];
        for texel in &self.texels {
            bins[texel.bin()] += 1;
        }
        bins
    }

    /// Histograms of consecutive runs of `chunk_width` texels, row by row.
    ///
    /// A partial run at the end of a row is ignored.
    pub fn chunk_histograms(&self, chunk_width: usize) -> Vec<[u32; NUM_BINS]> {
        if chunk_width == 0 {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        for row in self.texels.chunks(self.width) {
            for run in row.chunks_exact(chunk_width) {
                let mut bins = [0; NUM_BINS];
                for texel in run {
                    bins[texel.bin()] += 1;
                }
                chunks.push(bins);
            }
        }
        chunks
    }

    pub fn rows(&self) -> Vec<String> {
        self.texels
            .chunks(self.width)
            .map(|row| row.iter().map(|texel| texel.letter()).collect())
            .collect()
    }
}
