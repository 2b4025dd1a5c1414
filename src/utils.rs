use std::env;
use std::path::{Path, PathBuf};
use urlencoding::decode;

/// Resolve a user-supplied path (plain or `file://` URI) to an absolute, canonical path.
pub fn canonicalize_path(source_path: &str) -> PathBuf {
    let mut path_str = source_path.to_string();

    if let Some(rest) = path_str.strip_prefix("file://") {
        path_str = decode(rest)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| rest.to_string());
    }

    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().unwrap_or_default().join(path)
    };

    // dunce resolves . and .. without the \\?\ prefix on Windows
    dunce::canonicalize(&absolute).unwrap_or(absolute)
}

/// Parse an address or count given as "0x1234" hex or decimal.
pub fn parse_number(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => trimmed.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", input, e))
}
