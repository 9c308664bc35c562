use std::{collections::BTreeSet, error::Error as StdError, fmt};

/// Expand a port expression such as `"80, 443, 8000-8010"` into the sorted,
/// de-duplicated list of ports it names. Ranges are inclusive.
pub fn parse_ports(expr: &str) -> Result<Vec<u16>, PortExprError> {
    let mut ports = BTreeSet::new();

    for part in expr.split(',').map(str::trim) {
        if part.is_empty() {
            continue;
        }

        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start.trim(), part)?;
                let end = parse_port(end.trim(), part)?;
                if end < start {
                    return Err(PortExprError::InvertedRange { start, end });
                }
                ports.extend(start..=end);
            }
            None => {
                ports.insert(parse_port(part, part)?);
            }
        }
    }

    if ports.is_empty() {
        return Err(PortExprError::Empty);
    }
    Ok(ports.into_iter().collect())
}

fn parse_port(raw: &str, part: &str) -> Result<u16, PortExprError> {
    let port = raw
        .parse::<u16>()
        .map_err(|e| PortExprError::InvalidPort(part.to_string(), e))?;
    if port == 0 {
        return Err(PortExprError::ZeroPort(part.to_string()));
    }
    Ok(port)
}

#[derive(Debug)]
pub enum PortExprError {
    Empty,
    InvalidPort(String, std::num::ParseIntError),
    ZeroPort(String),
    InvertedRange { start: u16, end: u16 },
}

impl fmt::Display for PortExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PortExprError::*;
        match self {
            Empty => write!(f, "no port given"),
            InvalidPort(part, e) => write!(f, "invalid port in '{}': {}", part, e),
            ZeroPort(part) => write!(f, "port 0 in '{}' is not a valid target", part),
            InvertedRange { start, end } => {
                write!(f, "range {}-{} ends before it starts", start, end)
            }
        }
    }
}

impl StdError for PortExprError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PortExprError::InvalidPort(_, e) => Some(e),
            _ => None,
        }
    }
}
