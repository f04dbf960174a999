use crate::error::Result;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::trace;

/// Read every EXIF field as `(tag name, value)`. Images without an EXIF
/// block yield an empty list.
pub fn read_exif(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let exif = match ::exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(::exif::Error::NotFound(_)) => {
            trace!("No EXIF block in {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    Ok(exif
        .fields()
        .map(|field| (field.tag.to_string(), field_value(field)))
        .collect())
}

fn field_value(field: &::exif::Field) -> String {
    match &field.value {
        // display_value() wraps ASCII in quotes; compare on the raw text.
        ::exif::Value::Ascii(parts) => parts
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect::<Vec<_>>()
            .join(" "),
        _ => field.display_value().to_string(),
    }
}
