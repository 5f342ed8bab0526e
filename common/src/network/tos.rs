//! IP Type-of-Service / DSCP keywords accepted by `-T`.

const TOS_KEYWORDS: &[(&str, u8)] = &[
    ("af11", 0x28),
    ("af12", 0x30),
    ("af13", 0x38),
    ("af21", 0x48),
    ("af22", 0x50),
    ("af23", 0x58),
    ("af31", 0x68),
    ("af32", 0x70),
    ("af33", 0x78),
    ("af41", 0x88),
    ("af42", 0x90),
    ("af43", 0x98),
    ("critical", 0xa0),
    ("cs0", 0x00),
    ("cs1", 0x20),
    ("cs2", 0x40),
    ("cs3", 0x60),
    ("cs4", 0x80),
    ("cs5", 0xa0),
    ("cs6", 0xc0),
    ("cs7", 0xe0),
    ("ef", 0xb8),
    ("inetcontrol", 0xc0),
    ("lowcost", 0x02),
    ("lowdelay", 0x10),
    ("netcontrol", 0xe0),
    ("reliability", 0x04),
    ("throughput", 0x08),
];

/// Parses a keyword, a decimal byte or a `0x` prefixed hex byte.
pub fn parse_tos(s: &str) -> Result<u8, String> {
    let lower = s.trim().to_ascii_lowercase();

    if let Some((_, value)) = TOS_KEYWORDS.iter().find(|(name, _)| *name == lower) {
        return Ok(*value);
    }

    let parsed = match lower.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => lower.parse::<u32>(),
    };

    parsed
        .ok()
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| format!("illegal tos value {s}"))
}
