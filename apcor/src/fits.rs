//! FITS access for PSFEx model tables and reconstructed PSF stamps.
//!
//! Card parsing, image payloads and binary-table rows come from `fitsio`
//! (the pure-Rust `fitsio-pure` package and its `compat` API). This module
//! adds what the PSFEx files need on top of it: a checked pass over the
//! declared HDU sizes before any payload is decoded, `TDIMn` shapes for
//! vector cells, and writes that refuse to replace an existing file.

use fitsio::bintable::{self, BinaryColumnData, BinaryColumnDescriptor, BinaryColumnType};
use fitsio::block::padded_byte_len;
use fitsio::compat::errors::Error as CompatError;
use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::hdu::{FitsHdu, HduInfo};
use fitsio::compat::headers::ReadsKey;
use fitsio::compat::images::ReadImage;
use fitsio::header::{header_byte_len, parse_header_blocks, serialize_header};
use fitsio::BLOCK_SIZE;
use ndarray::{Array2, ArrayView2};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use fitsio::header::Card;
pub use fitsio::value::Value;

/// Longest string value a single header card holds
pub const MAX_STRING_VALUE: usize = 68;

/// Errors raised while reading or writing FITS files
#[derive(Debug, Error)]
pub enum FitsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File ends before the declared header or data")]
    Truncated,

    #[error("Missing required keyword {0}")]
    MissingKeyword(String),

    #[error("Invalid value for keyword {keyword}: {reason}")]
    InvalidKeyword { keyword: String, reason: String },

    #[error("Unsupported FITS content: {0}")]
    Unsupported(String),

    #[error("FITS format error: {0}")]
    Format(CompatError),

    #[error("Destination {0} already exists and overwrite was not requested")]
    DestinationExists(PathBuf),
}

impl From<fitsio::Error> for FitsError {
    fn from(e: fitsio::Error) -> Self {
        match e {
            fitsio::Error::Io(e) => Self::Io(e),
            fitsio::Error::UnexpectedEof => Self::Truncated,
            other => Self::Format(CompatError::Fits(other)),
        }
    }
}

impl From<CompatError> for FitsError {
    fn from(e: CompatError) -> Self {
        match e {
            CompatError::Io(e) => Self::Io(e),
            CompatError::Fits(e) => e.into(),
            other => Self::Format(other),
        }
    }
}

/// A FITS file held in memory after its layout has been checked
pub struct FitsReader {
    file: FitsFile,
}

impl FitsReader {
    /// Read the whole file and check every declared HDU size against it
    ///
    /// # Errors
    ///
    /// [`FitsError::Io`] when the file cannot be read, [`FitsError::Truncated`]
    /// when a declared data size overflows or runs past the end of the file,
    /// and [`FitsError::InvalidKeyword`] for negative sizes or a table column
    /// wider than its row.
    pub fn open(path: &Path) -> Result<Self, FitsError> {
        let file = FitsFile::open(path)?;
        check_layout(file.data())?;
        let hdus = file.num_hdus()?;
        log::debug!("Opened {} with {hdus} HDU(s)", path.display());
        Ok(Self { file })
    }

    pub fn num_hdus(&self) -> Result<usize, FitsError> {
        Ok(self.file.num_hdus()?)
    }

    fn handle(&self, hdu: usize) -> Result<FitsHdu, FitsError> {
        let count = self.num_hdus()?;
        if hdu >= count {
            return Err(FitsError::Unsupported(format!(
                "HDU {hdu} requested but file has {count} HDUs"
            )));
        }
        Ok(self.file.hdu(hdu)?)
    }

    /// Keywords of `hdu` in header order, `END` excluded
    pub fn keywords(&self, hdu: usize) -> Result<Vec<String>, FitsError> {
        self.handle(hdu)?;
        let parsed = self.file.parsed()?;
        Ok(parsed
            .get(hdu)
            .map(|h| {
                h.cards
                    .iter()
                    .filter(|c| !c.is_end())
                    .map(|c| c.keyword_str().to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Whether `hdu` has a value card for `keyword`
    pub fn has_key(&self, hdu: usize, keyword: &str) -> Result<bool, FitsError> {
        self.handle(hdu)?;
        let parsed = self.file.parsed()?;
        Ok(parsed.get(hdu).is_some_and(|h| {
            h.cards
                .iter()
                .any(|c| c.keyword_str() == keyword && c.value.is_some())
        }))
    }

    /// Typed value of a required keyword
    pub fn key<T: ReadsKey>(&self, hdu: usize, keyword: &str) -> Result<T, FitsError> {
        self.optional_key(hdu, keyword)?
            .ok_or_else(|| FitsError::MissingKeyword(keyword.to_string()))
    }

    /// Typed value of a keyword, `None` when the header lacks it
    pub fn optional_key<T: ReadsKey>(
        &self,
        hdu: usize,
        keyword: &str,
    ) -> Result<Option<T>, FitsError> {
        if !self.has_key(hdu, keyword)? {
            return Ok(None);
        }
        self.handle(hdu)?
            .read_key::<T>(&self.file, keyword)
            .map(Some)
            .map_err(|e| FitsError::InvalidKeyword {
                keyword: keyword.to_string(),
                reason: e.to_string(),
            })
    }

    /// 2-D image payload of `hdu` as `(NAXIS2, NAXIS1)`
    pub fn image(&self, hdu: usize) -> Result<Array2<f64>, FitsError> {
        let handle = self.handle(hdu)?;
        let shape = match handle.info(&self.file)? {
            HduInfo::ImageInfo { shape, .. } => shape,
            other => {
                return Err(FitsError::Unsupported(format!(
                    "HDU {hdu} is not an image: {other:?}"
                )))
            }
        };
        let (nx, ny) = match shape.as_slice() {
            [nx, ny] => (*nx, *ny),
            _ => {
                return Err(FitsError::Unsupported(format!(
                    "expected a 2-D image, found axes {shape:?}"
                )))
            }
        };

        let pixels = f64::read_image(&self.file, &handle)?;
        Array2::from_shape_vec((ny, nx), pixels).map_err(|_| FitsError::Truncated)
    }

    /// Cell of 1-based `column` in the first row of a binary table, as `f64`
    pub fn vector_cell(&self, hdu: usize, column: usize) -> Result<Vec<f64>, FitsError> {
        let handle = self.handle(hdu)?;
        match handle.info(&self.file)? {
            HduInfo::TableInfo {
                column_count,
                row_count,
            } => {
                if row_count == 0 {
                    return Err(FitsError::Unsupported(format!("table in HDU {hdu} has no rows")));
                }
                if column == 0 || column > column_count {
                    return Err(FitsError::Unsupported(format!(
                        "column {column} requested but table has {column_count}"
                    )));
                }
            }
            other => {
                return Err(FitsError::Unsupported(format!(
                    "HDU {hdu} is not a table: {other:?}"
                )))
            }
        }

        let parsed = self.file.parsed()?;
        let table = parsed
            .get(hdu)
            .ok_or_else(|| FitsError::Unsupported(format!("HDU {hdu} missing")))?;
        if !matches!(table.info, fitsio::hdu::HduInfo::BinaryTable { .. }) {
            return Err(FitsError::Unsupported("ASCII tables are not read".to_string()));
        }

        let mut row = bintable::read_binary_row(self.file.data(), table, 0)?;
        if column > row.len() {
            return Err(FitsError::Unsupported(format!("column {column} missing from row")));
        }
        match row.swap_remove(column - 1) {
            BinaryColumnData::Float(v) => Ok(v.into_iter().map(f64::from).collect()),
            BinaryColumnData::Double(v) => Ok(v),
            BinaryColumnData::Byte(v) => Ok(v.into_iter().map(f64::from).collect()),
            BinaryColumnData::Short(v) => Ok(v.into_iter().map(f64::from).collect()),
            BinaryColumnData::Int(v) => Ok(v.into_iter().map(f64::from).collect()),
            BinaryColumnData::Long(v) => Ok(v.into_iter().map(|x| x as f64).collect()),
            other => Err(FitsError::Unsupported(format!(
                "column {column} is not numeric: {other:?}"
            ))),
        }
    }

    /// Axis lengths from `TDIMn`, fastest axis first; `None` without the keyword
    pub fn column_dims(&self, hdu: usize, column: usize) -> Result<Option<Vec<usize>>, FitsError> {
        let keyword = format!("TDIM{column}");
        match self.optional_key::<String>(hdu, &keyword)? {
            Some(text) => parse_tdim(&text)
                .map(Some)
                .ok_or(FitsError::InvalidKeyword {
                    keyword,
                    reason: format!("cannot parse dimensions from {text:?}"),
                }),
            None => Ok(None),
        }
    }
}

/// Parse `"(nx, ny, ...)"` into positive axis lengths
fn parse_tdim(text: &str) -> Option<Vec<usize>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let dims = inner
        .split(',')
        .map(|part| part.trim().parse::<usize>().ok().filter(|&n| n > 0))
        .collect::<Option<Vec<_>>>()?;
    (!dims.is_empty()).then_some(dims)
}

fn card_integer(cards: &[Card], keyword: &str) -> Result<Option<i64>, FitsError> {
    match cards.iter().find(|c| c.keyword_str() == keyword) {
        Some(Card {
            value: Some(Value::Integer(n)),
            ..
        }) => Ok(Some(*n)),
        Some(Card { value: None, .. }) | None => Ok(None),
        Some(Card {
            value: Some(other), ..
        }) => Err(FitsError::InvalidKeyword {
            keyword: keyword.to_string(),
            reason: format!("expected an integer, found {other:?}"),
        }),
    }
}

/// Non-negative size keyword, `default` when absent
fn card_size(cards: &[Card], keyword: &str, default: Option<usize>) -> Result<usize, FitsError> {
    match card_integer(cards, keyword)? {
        Some(n) => usize::try_from(n).map_err(|_| FitsError::InvalidKeyword {
            keyword: keyword.to_string(),
            reason: format!("must be non-negative, found {n}"),
        }),
        None => default.ok_or_else(|| FitsError::MissingKeyword(keyword.to_string())),
    }
}

/// Payload bytes declared by one header
fn declared_data_len(cards: &[Card], is_primary: bool) -> Result<usize, FitsError> {
    let bitpix = card_integer(cards, "BITPIX")?
        .ok_or_else(|| FitsError::MissingKeyword("BITPIX".to_string()))?;
    let bytes_per_value = match bitpix {
        8 => 1,
        16 => 2,
        32 | -32 => 4,
        64 | -64 => 8,
        other => {
            return Err(FitsError::InvalidKeyword {
                keyword: "BITPIX".to_string(),
                reason: format!("unsupported value {other}"),
            })
        }
    };

    let naxis = card_size(cards, "NAXIS", None)?;
    if naxis == 0 {
        return Ok(0);
    }
    let mut values: usize = 1;
    for i in 1..=naxis {
        let dim = card_size(cards, &format!("NAXIS{i}"), None)?;
        values = values.checked_mul(dim).ok_or(FitsError::Truncated)?;
    }

    let (pcount, gcount) = if is_primary {
        (0, 1)
    } else {
        (
            card_size(cards, "PCOUNT", Some(0))?,
            card_size(cards, "GCOUNT", Some(1))?.max(1),
        )
    };

    values
        .checked_mul(bytes_per_value)
        .and_then(|n| n.checked_add(pcount))
        .and_then(|n| n.checked_mul(gcount))
        .ok_or(FitsError::Truncated)
}

/// Check that the `TFORMn` widths of a binary table fit in `NAXIS1`
fn check_table_row(cards: &[Card]) -> Result<(), FitsError> {
    let tfields = card_size(cards, "TFIELDS", None)?;
    let naxis1 = card_size(cards, "NAXIS1", None)?;

    let mut width: usize = 0;
    for n in 1..=tfields {
        let keyword = format!("TFORM{n}");
        let tform = match cards.iter().find(|c| c.keyword_str() == keyword) {
            Some(Card {
                value: Some(Value::String(s)),
                ..
            }) => s.clone(),
            _ => return Err(FitsError::MissingKeyword(keyword)),
        };
        let invalid = |reason: String| FitsError::InvalidKeyword {
            keyword: keyword.clone(),
            reason,
        };
        let (repeat, col_type) = bintable::parse_tform_binary(&tform)
            .map_err(|e| invalid(format!("{tform:?}: {e}")))?;
        let column_width = match col_type {
            BinaryColumnType::Bit => Some(repeat.div_ceil(8)),
            other => repeat.checked_mul(bintable::binary_type_byte_size(&other)),
        };
        width = column_width
            .and_then(|w| width.checked_add(w))
            .ok_or_else(|| invalid(format!("{tform:?} is wider than any row")))?;
    }

    if width > naxis1 {
        return Err(FitsError::InvalidKeyword {
            keyword: "NAXIS1".to_string(),
            reason: format!("rows are {naxis1} bytes but the columns need {width}"),
        });
    }
    Ok(())
}

/// Walk the HDUs and check every declared size against the bytes present.
///
/// The table and image decoders index the payload with the declared sizes,
/// so sizes that overflow or run past the end are rejected before decoding.
fn check_layout(bytes: &[u8]) -> Result<(), FitsError> {
    let mut offset = 0;
    let mut index = 0;
    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < BLOCK_SIZE || remaining.iter().all(|&b| b == 0) {
            break;
        }

        let parsed = header_byte_len(remaining).and_then(|len| {
            parse_header_blocks(&remaining[..len]).map(|cards| (len, cards))
        });
        let (header_len, cards) = match parsed {
            Ok(parsed) => parsed,
            // Trailing bytes after the last HDU are ignored
            Err(_) if index > 0 => break,
            Err(e) => return Err(e.into()),
        };

        let data_len = declared_data_len(&cards, index == 0)?;
        let data_start = offset + header_len;
        data_start
            .checked_add(data_len)
            .filter(|&end| end <= bytes.len())
            .ok_or(FitsError::Truncated)?;

        let is_bintable = cards.iter().any(|c| {
            c.keyword_str() == "XTENSION"
                && matches!(&c.value, Some(Value::String(s)) if s.trim() == "BINTABLE")
        });
        if is_bintable {
            check_table_row(&cards)?;
        }

        offset = data_start + padded_byte_len(data_len).min(bytes.len() - data_start);
        index += 1;
    }
    Ok(())
}

fn keyword_bytes(keyword: &str) -> [u8; 8] {
    let mut bytes = [b' '; 8];
    for (dst, src) in bytes.iter_mut().zip(keyword.bytes()) {
        *dst = src.to_ascii_uppercase();
    }
    bytes
}

/// A value card; strings longer than a card allows are truncated
pub fn card(keyword: &str, value: Value, comment: Option<&str>) -> Card {
    let value = match value {
        Value::String(s) if s.chars().count() > MAX_STRING_VALUE => {
            Value::String(s.chars().take(MAX_STRING_VALUE).collect())
        }
        other => other,
    };
    Card {
        keyword: keyword_bytes(keyword),
        value: Some(value),
        comment: comment.map(str::to_string),
    }
}

/// A `COMMENT` card
pub fn comment_card(text: &str) -> Card {
    Card {
        keyword: keyword_bytes("COMMENT"),
        value: None,
        comment: Some(text.to_string()),
    }
}

/// Serialized primary HDU without data
pub fn empty_primary() -> Result<Vec<u8>, FitsError> {
    let cards = fitsio::primary::build_primary_header(8, &[])?;
    Ok(serialize_header(&cards))
}

/// Serialized primary HDU holding `pixels` as `BITPIX = -64`, then `extra` cards
pub fn image_hdu(pixels: ArrayView2<'_, f64>, extra: Vec<Card>) -> Result<Vec<u8>, FitsError> {
    let (ny, nx) = pixels.dim();
    let mut cards = fitsio::primary::build_primary_header(-64, &[nx, ny])?;
    cards.extend(extra);

    // Logical row-major order puts NAXIS1 fastest
    let values: Vec<f64> = pixels.iter().copied().collect();
    let mut bytes = serialize_header(&cards);
    bytes.extend(fitsio::image::serialize_image_f64(&values));
    Ok(bytes)
}

/// One single-precision vector column of a single-row table
#[derive(Debug, Clone)]
pub struct VectorColumn<'a> {
    pub name: &'a str,
    pub values: &'a [f64],
    /// Written as `TDIMn` when present
    pub dims: Option<&'a [usize]>,
}

/// Serialized single-row binary table extension with `E` columns
pub fn vector_table_hdu(
    extname: &str,
    columns: &[VectorColumn<'_>],
    extra: Vec<Card>,
) -> Result<Vec<u8>, FitsError> {
    let descriptors: Vec<BinaryColumnDescriptor> = columns
        .iter()
        .map(|c| BinaryColumnDescriptor {
            name: Some(c.name.to_string()),
            repeat: c.values.len(),
            col_type: BinaryColumnType::Float,
            byte_width: c.values.len() * 4,
        })
        .collect();
    let data: Vec<BinaryColumnData> = columns
        .iter()
        .map(|c| BinaryColumnData::Float(c.values.iter().map(|&v| v as f32).collect()))
        .collect();

    let mut cards = bintable::build_binary_table_cards(&descriptors, 1, 0)?;
    for (n, column) in columns.iter().enumerate() {
        if let Some(dims) = column.dims {
            let text: Vec<String> = dims.iter().map(usize::to_string).collect();
            cards.push(card(
                &format!("TDIM{}", n + 1),
                Value::String(format!("({})", text.join(", "))),
                None,
            ));
        }
    }
    cards.push(card("EXTNAME", Value::String(extname.to_string()), None));
    cards.extend(extra);

    let mut bytes = serialize_header(&cards);
    bytes.extend(bintable::serialize_binary_table(&descriptors, &data, 1)?);
    Ok(bytes)
}

/// Write serialized HDUs to `path`.
///
/// Without `overwrite` the file is opened with `create_new`, so an
/// existing destination is detected by the open itself.
///
/// # Errors
///
/// [`FitsError::DestinationExists`] when `path` exists and `overwrite` is
/// unset, [`FitsError::Io`] for any other write failure.
pub fn write_hdus(path: &Path, hdus: &[Vec<u8>], overwrite: bool) -> Result<(), FitsError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = options.open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::AlreadyExists => FitsError::DestinationExists(path.to_path_buf()),
        _ => FitsError::Io(e),
    })?;

    for hdu in hdus {
        file.write_all(hdu)?;
    }
    file.flush()?;
    log::debug!("Wrote {} HDU(s) to {}", hdus.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn raw_header(cards: &[(&str, Value)]) -> Vec<u8> {
        let cards: Vec<Card> = cards.iter().map(|(k, v)| card(k, v.clone(), None)).collect();
        serialize_header(&cards)
    }

    fn write_raw(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_image_round_trip_keeps_card_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stamp.fits");
        let pixels = array![[1.0, 2.0, 3.0], [4.0, 5.5, -6.25]];
        let cards = vec![
            card("X_IMAGE", Value::Float(10.5), Some("x")),
            comment_card(" separator"),
            card("NAME", Value::String("stamp".to_string()), None),
        ];
        write_hdus(&path, &[image_hdu(pixels.view(), cards).unwrap()], false).unwrap();

        let reader = FitsReader::open(&path).unwrap();
        assert_eq!(reader.num_hdus().unwrap(), 1);
        assert_eq!(reader.image(0).unwrap(), pixels);
        assert_eq!(reader.key::<f64>(0, "X_IMAGE").unwrap(), 10.5);
        assert_eq!(reader.key::<String>(0, "NAME").unwrap(), "stamp");
        assert_eq!(reader.key::<i64>(0, "BITPIX").unwrap(), -64);

        let keywords = reader.keywords(0).unwrap();
        let x = keywords.iter().position(|k| k == "X_IMAGE").unwrap();
        assert_eq!(keywords[x + 1], "COMMENT");
        assert_eq!(keywords[x + 2], "NAME");
    }

    #[test]
    fn test_missing_and_mistyped_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.fits");
        let cards = vec![card("LABEL", Value::String("abc".to_string()), None)];
        write_hdus(&path, &[image_hdu(array![[0.0]].view(), cards).unwrap()], false).unwrap();

        let reader = FitsReader::open(&path).unwrap();
        assert!(matches!(
            reader.key::<f64>(0, "ABSENT"),
            Err(FitsError::MissingKeyword(k)) if k == "ABSENT"
        ));
        assert_eq!(reader.optional_key::<f64>(0, "ABSENT").unwrap(), None);
        assert!(matches!(
            reader.key::<f64>(0, "LABEL"),
            Err(FitsError::InvalidKeyword { keyword, .. }) if keyword == "LABEL"
        ));
        assert!(matches!(reader.key::<f64>(3, "LABEL"), Err(FitsError::Unsupported(_))));
    }

    #[test]
    fn test_long_string_values_are_truncated() {
        let long = "d".repeat(100);
        let truncated = card("PSFEX", Value::String(long), None);
        assert_eq!(
            truncated.value,
            Some(Value::String("d".repeat(MAX_STRING_VALUE)))
        );

        let accented = "é".repeat(70);
        let truncated = card("PSFEX", Value::String(accented), None);
        assert_eq!(
            truncated.value,
            Some(Value::String("é".repeat(MAX_STRING_VALUE)))
        );
    }

    #[test]
    fn test_vector_table_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.fits");
        let values: Vec<f64> = (0..12).map(|v| v as f64 * 0.5).collect();
        let columns = [VectorColumn {
            name: "PSF_MASK",
            values: &values,
            dims: Some(&[2, 3, 2]),
        }];
        let table = vector_table_hdu("PSF_DATA", &columns, vec![]).unwrap();
        write_hdus(&path, &[empty_primary().unwrap(), table], false).unwrap();

        let reader = FitsReader::open(&path).unwrap();
        assert_eq!(reader.num_hdus().unwrap(), 2);
        assert_eq!(reader.key::<String>(1, "EXTNAME").unwrap(), "PSF_DATA");
        assert_eq!(reader.key::<String>(1, "TFORM1").unwrap(), "12E");
        assert_eq!(reader.vector_cell(1, 1).unwrap(), values);
        assert_eq!(reader.column_dims(1, 1).unwrap(), Some(vec![2, 3, 2]));
        assert!(reader.vector_cell(1, 2).is_err());
        assert!(reader.vector_cell(0, 1).is_err());
    }

    #[test]
    fn test_parse_tdim() {
        assert_eq!(parse_tdim("(25, 25, 10)"), Some(vec![25, 25, 10]));
        assert_eq!(parse_tdim(" (7) "), Some(vec![7]));
        assert_eq!(parse_tdim("25, 25"), None);
        assert_eq!(parse_tdim("(25, -1)"), None);
        assert_eq!(parse_tdim("(0, 3)"), None);
        assert_eq!(parse_tdim("()"), None);
    }

    #[test]
    fn test_write_refuses_existing_destination() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("psf.fits");
        let first = image_hdu(array![[1.0]].view(), vec![]).unwrap();
        let second = image_hdu(array![[2.0]].view(), vec![]).unwrap();

        write_hdus(&path, &[first], false).unwrap();
        let result = write_hdus(&path, &[second.clone()], false);
        assert!(matches!(result, Err(FitsError::DestinationExists(p)) if p == path));

        // The original contents survive the refused write
        let reread = FitsReader::open(&path).unwrap();
        assert_eq!(reread.image(0).unwrap(), array![[1.0]]);

        write_hdus(&path, &[second], true).unwrap();
        let reread = FitsReader::open(&path).unwrap();
        assert_eq!(reread.image(0).unwrap(), array![[2.0]]);
    }

    #[test]
    fn test_oversized_axes_are_rejected() {
        let dir = TempDir::new().unwrap();

        // Product of the axes overflows usize
        let header = raw_header(&[
            ("SIMPLE", Value::Logical(true)),
            ("BITPIX", Value::Integer(8)),
            ("NAXIS", Value::Integer(2)),
            ("NAXIS1", Value::Integer(4_611_686_018_427_387_904)),
            ("NAXIS2", Value::Integer(4)),
        ]);
        let path = write_raw(&dir, "overflow.fits", &header);
        assert!(matches!(FitsReader::open(&path), Err(FitsError::Truncated)));

        // Product fits but runs far past the end of the file
        let header = raw_header(&[
            ("SIMPLE", Value::Logical(true)),
            ("BITPIX", Value::Integer(8)),
            ("NAXIS", Value::Integer(2)),
            ("NAXIS1", Value::Integer(4_611_686_018_427_387_904)),
            ("NAXIS2", Value::Integer(3)),
        ]);
        let path = write_raw(&dir, "past_end.fits", &header);
        assert!(matches!(FitsReader::open(&path), Err(FitsError::Truncated)));

        // Data end overflows once the header length is added
        let header = raw_header(&[
            ("SIMPLE", Value::Logical(true)),
            ("BITPIX", Value::Integer(8)),
            ("NAXIS", Value::Integer(2)),
            ("NAXIS1", Value::Integer(i64::MAX)),
            ("NAXIS2", Value::Integer(2)),
        ]);
        let path = write_raw(&dir, "end_overflow.fits", &header);
        assert!(matches!(FitsReader::open(&path), Err(FitsError::Truncated)));
    }

    #[test]
    fn test_negative_sizes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut bytes = empty_primary().unwrap();
        bytes.extend(raw_header(&[
            ("XTENSION", Value::String("BINTABLE".to_string())),
            ("BITPIX", Value::Integer(8)),
            ("NAXIS", Value::Integer(2)),
            ("NAXIS1", Value::Integer(4)),
            ("NAXIS2", Value::Integer(1)),
            ("PCOUNT", Value::Integer(0)),
            ("GCOUNT", Value::Integer(1)),
            ("TFIELDS", Value::Integer(-1)),
        ]));
        bytes.extend(vec![0u8; BLOCK_SIZE]);
        let path = write_raw(&dir, "negative.fits", &bytes);
        assert!(matches!(
            FitsReader::open(&path),
            Err(FitsError::InvalidKeyword { keyword, .. }) if keyword == "TFIELDS"
        ));
    }

    #[test]
    fn test_column_wider_than_row_is_rejected() {
        let dir = TempDir::new().unwrap();
        for (name, tform) in [("wide.fits", "3E"), ("huge.fits", "4611686018427387904E")] {
            let mut bytes = empty_primary().unwrap();
            bytes.extend(raw_header(&[
                ("XTENSION", Value::String("BINTABLE".to_string())),
                ("BITPIX", Value::Integer(8)),
                ("NAXIS", Value::Integer(2)),
                ("NAXIS1", Value::Integer(8)),
                ("NAXIS2", Value::Integer(1)),
                ("PCOUNT", Value::Integer(0)),
                ("GCOUNT", Value::Integer(1)),
                ("TFIELDS", Value::Integer(1)),
                ("TFORM1", Value::String(tform.to_string())),
            ]));
            bytes.extend(vec![0u8; BLOCK_SIZE]);
            let path = write_raw(&dir, name, &bytes);
            assert!(
                matches!(FitsReader::open(&path), Err(FitsError::InvalidKeyword { .. })),
                "{tform} should be rejected"
            );
        }
    }

    #[test]
    fn test_short_input_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(&dir, "empty.fits", &[]);
        assert!(matches!(FitsReader::open(&path), Err(FitsError::Truncated)));

        let path = write_raw(&dir, "short.fits", &[b' '; 100]);
        assert!(matches!(FitsReader::open(&path), Err(FitsError::Truncated)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = FitsReader::open(&dir.path().join("nope.fits"));
        assert!(matches!(result, Err(FitsError::Io(_))));
    }
}
