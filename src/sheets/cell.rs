use std::fmt;
use std::str::FromStr;

/// A1-style cell address. `col` is zero based, `row` is one based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub col: u32,
    pub row: u32,
}

impl CellRef {
    pub const fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

pub fn column_letters(col: u32) -> String {
    let mut n = col + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellParseError(String);

impl fmt::Display for CellParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cell reference `{}`", self.0)
    }
}

impl std::error::Error for CellParseError {}

impl FromStr for CellRef {
    type Err = CellParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let raw = input.trim().to_ascii_uppercase();
        let fail = || CellParseError(input.to_string());

        let split = raw
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(fail)?;
        let (letters, digits) = raw.split_at(split);
        if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(fail());
        }

        let mut col: u32 = 0;
        for b in letters.bytes() {
            col = col
                .checked_mul(26)
                .and_then(|v| v.checked_add(u32::from(b - b'A') + 1))
                .ok_or_else(fail)?;
        }
        let row = digits.parse::<u32>().map_err(|_| fail())?;
        if row == 0 {
            return Err(fail());
        }

        Ok(Self { col: col - 1, row })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}
