use std::collections::HashMap;

use thiserror::Error;

/// Header names (case-sensitive) accepted as the phone-bearing column.
pub const PHONE_COLUMNS: [&str; 4] = ["telefono", "phone", "Phone", "celular"];

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("CSV inválido: {0}")]
    Malformed(#[from] csv::Error),
    #[error("El archivo CSV no tiene columna de teléfono (telefono, phone, Phone o celular)")]
    MissingPhoneColumn,
}

/// One valid row of the uploaded contact list: a phone number plus every
/// column addressable by the variable resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub phone: String,
    pub fields: HashMap<String, String>,
}

/// Parses the uploaded CSV (header row required) and keeps, in file order,
/// every row with a non-empty phone value. Rows without a phone are dropped
/// silently; they never count toward the campaign total.
pub fn parse_contacts(csv_data: &str) -> Result<Vec<Contact>, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let phone_column = headers
        .iter()
        .position(|h| PHONE_COLUMNS.contains(&h.as_str()))
        .ok_or(CsvError::MissingPhoneColumn)?;

    let mut contacts = Vec::new();
    for record in reader.records() {
        let record = record?;
        let phone = record.get(phone_column).unwrap_or("").trim();
        if phone.is_empty() {
            continue;
        }
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.trim().to_string()))
            .collect();
        contacts.push(Contact {
            phone: phone.to_string(),
            fields,
        });
    }
    Ok(contacts)
}
