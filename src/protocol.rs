//! Serial line protocol: decoding requests and encoding replies.
//!
//! Requests are newline-terminated ASCII, case-sensitive. Decoding never
//! fails: anything that is not a known command becomes `Request::Unknown`,
//! and short or garbled payloads decode with zeros in the missing places.
//! Acting on a request is the console's job.

use core::fmt::{self, Write};

use heapless::String;

use crate::config::{MAX_COMBO_KEYS, NUM_TOTAL_MAPS};
use crate::keymap::{Action, Keymap};
use crate::stats::Usage;

pub const EOL: &str = "\r\n";

const SET_CONFIG: &str = "SET_CONFIG:";
const SONG_INFO: &str = "SONG_INFO:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request<'a> {
    GetConfig,
    SetConfig(Keymap),
    ResetConfig,
    GetStats,
    SongInfo(SongUpdate<'a>),
    Unknown(&'a str),
}

/// Decoded `SONG_INFO` payload. `None` marks a field that was not sent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SongUpdate<'a> {
    pub title: Option<&'a str>,
    pub playing: Option<bool>,
    pub position_ms: Option<u32>,
    pub duration_ms: Option<u32>,
}

impl<'a> Request<'a> {
    /// Decode one line (terminator already removed). Blank lines give `None`.
    pub fn parse(line: &'a str) -> Option<Self> {
        let line = line
            .trim_start_matches([' ', '\t', '\r'])
            .trim_end_matches('\r');
        if line.is_empty() {
            return None;
        }

        let request = match line {
            "GET_CONFIG" => Request::GetConfig,
            "RESET_CONFIG" => Request::ResetConfig,
            "GET_STATS" => Request::GetStats,
            _ => {
                if let Some(payload) = line.strip_prefix(SET_CONFIG) {
                    Request::SetConfig(parse_keymap(payload))
                } else if let Some(payload) = line.strip_prefix(SONG_INFO) {
                    Request::SongInfo(parse_song(payload))
                } else {
                    Request::Unknown(line)
                }
            }
        };
        Some(request)
    }
}

// strtok-style: empty fields between separators are skipped
fn fields(payload: &str) -> impl Iterator<Item = &str> {
    payload.split(',').filter(|f| !f.is_empty())
}

/// `atoi`-like: optional sign then leading digits, anything else stops the
/// number. No digits gives 0. Overflow wraps.
pub fn parse_int(field: &str) -> i64 {
    let s = field.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.wrapping_mul(10).wrapping_add((d - b'0') as i64));
    if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    }
}

/// `(tag, code0..code3)` groups, comma separated, for every table entry.
/// Missing values are 0; missing entries are `None`.
pub fn parse_keymap(payload: &str) -> Keymap {
    let mut map = Keymap::new();
    let mut values = fields(payload).map(parse_int);

    for index in 0..NUM_TOTAL_MAPS {
        let Some(tag) = values.next() else {
            break;
        };
        let mut codes = [0u16; MAX_COMBO_KEYS];
        for code in codes.iter_mut() {
            *code = values.next().unwrap_or(0) as u16;
        }
        map.set(index, Action::from_raw(tag as u8, codes));
    }
    map
}

/// `title,playing,position_ms,duration_ms`.
pub fn parse_song(payload: &str) -> SongUpdate<'_> {
    let mut f = fields(payload);
    SongUpdate {
        title: f.next(),
        playing: f.next().map(|v| parse_int(v) != 0),
        position_ms: f.next().map(|v| parse_int(v) as u32),
        duration_ms: f.next().map(|v| parse_int(v) as u32),
    }
}

#[derive(Copy, Clone, Debug)]
pub enum Reply<'a> {
    Ok,
    Config(&'a Keymap),
    Erased,
    Stats { ram: Usage, storage: Usage },
    Command(usize),
    UnknownCommand,
    StorageFailed,
}

impl Reply<'_> {
    pub fn write_to<W: Write>(&self, out: &mut W) -> fmt::Result {
        match self {
            Reply::Ok => out.write_str("OK")?,
            Reply::Config(map) => {
                out.write_str("CONFIG:")?;
                for (i, action) in map.iter().enumerate() {
                    if i > 0 {
                        out.write_char(',')?;
                    }
                    write!(out, "{}", action.tag())?;
                    for code in action.codes() {
                        write!(out, ",{}", code)?;
                    }
                }
            }
            Reply::Erased => out.write_str("Config erased. Please reboot the device.")?,
            Reply::Stats { ram, storage } => write!(
                out,
                "SRAM: {}/{} B, EEPROM: {}/{} B",
                ram.used(),
                ram.total(),
                storage.used(),
                storage.total()
            )?,
            Reply::Command(index) => write!(out, "CMD:{}", index)?,
            Reply::UnknownCommand => out.write_str("ERROR: Unknown command")?,
            Reply::StorageFailed => out.write_str("ERROR: storage write failed")?,
        }
        out.write_str(EOL)
    }

    /// Append the whole reply or, when it does not fit, nothing at all.
    pub fn append_to<const N: usize>(&self, out: &mut String<N>) -> fmt::Result {
        let mark = out.len();
        self.write_to(out).inspect_err(|_| out.truncate(mark))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ENCODER_SW_INDEX, NUM_KEYS};

    fn render(reply: Reply<'_>) -> String<512> {
        let mut s = String::new();
        reply.write_to(&mut s).unwrap();
        s
    }

    #[test]
    fn fixed_commands_and_whitespace() {
        assert_eq!(Request::parse("GET_CONFIG"), Some(Request::GetConfig));
        assert_eq!(Request::parse(" \t\rGET_STATS\r"), Some(Request::GetStats));
        assert_eq!(Request::parse("RESET_CONFIG"), Some(Request::ResetConfig));
        assert_eq!(Request::parse(""), None);
        assert_eq!(Request::parse("\r"), None);
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert_eq!(Request::parse("get_config"), Some(Request::Unknown("get_config")));
        assert_eq!(Request::parse("GET_CONFIGX"), Some(Request::Unknown("GET_CONFIGX")));
    }

    #[test]
    fn int_parsing_matches_atoi() {
        assert_eq!(parse_int("42"), 42);
        assert_eq!(parse_int(" -7"), -7);
        assert_eq!(parse_int("12abc"), 12);
        assert_eq!(parse_int("abc"), 0);
        assert_eq!(parse_int(""), 0);
        assert_eq!(parse_int("65537") as u16, 1);
    }

    #[test]
    fn short_set_config_zero_fills() {
        let map = parse_keymap("1,4,5");
        assert_eq!(map.get(0), Action::Keyboard([4, 5, 0, 0]));
        assert!((1..NUM_TOTAL_MAPS).all(|i| map.get(i) == Action::None));

        let map = parse_keymap("garbage");
        assert!(map.iter().all(|a| *a == Action::None));
    }

    #[test]
    fn set_config_skips_empty_fields() {
        let map = parse_keymap(",,2,,205,0,0,0,3");
        assert_eq!(map.get(0), Action::Consumer([205, 0, 0, 0]));
        assert_eq!(map.get(1), Action::Command);
    }

    #[test]
    fn song_info_fields() {
        let update = parse_song("Some Song,1,12000,180000");
        assert_eq!(
            update,
            SongUpdate {
                title: Some("Some Song"),
                playing: Some(true),
                position_ms: Some(12_000),
                duration_ms: Some(180_000),
            }
        );

        let update = parse_song("Only Title");
        assert_eq!(update.title, Some("Only Title"));
        assert_eq!(update.playing, None);
        assert_eq!(update.duration_ms, None);

        assert_eq!(parse_song(""), SongUpdate::default());
    }

    #[test]
    fn config_reply_lists_every_entry() {
        let mut map = Keymap::new();
        map.set(0, Action::Keyboard([0xE0, 6, 0, 0]));
        map.set(ENCODER_SW_INDEX, Action::Consumer([205, 0, 0, 0]));
        let text = render(Reply::Config(&map));

        let body = text.strip_prefix("CONFIG:").unwrap().strip_suffix(EOL).unwrap();
        let values: heapless::Vec<&str, 128> = body.split(',').collect();
        assert_eq!(values.len(), NUM_TOTAL_MAPS * (1 + MAX_COMBO_KEYS));
        assert_eq!(&values[..5], &["1", "224", "6", "0", "0"]);
        let sw = (NUM_KEYS + 2) * 5;
        assert_eq!(&values[sw..sw + 2], &["2", "205"]);
    }

    #[test]
    fn set_then_get_round_trips() {
        let payload = "1,224,225,4,0,2,205,0,0,0,3,0,0,0,0,0,0,0,0,0,\
                       1,58,0,0,0,0,0,0,0,0,0,0,0,0,0,\
                       0,0,0,0,0,2,233,0,0,0,2,234,0,0,0,2,205,0,0,0,\
                       2,181,0,0,0,2,182,0,0,0";
        let map = parse_keymap(payload);
        let text = render(Reply::Config(&map));
        assert_eq!(text.strip_prefix("CONFIG:").unwrap().strip_suffix(EOL).unwrap(), payload);
    }

    #[test]
    fn append_is_all_or_nothing() {
        let mut map = Keymap::new();
        for i in 0..NUM_TOTAL_MAPS {
            map.set(i, Action::Keyboard([u16::MAX; MAX_COMBO_KEYS]));
        }
        let mut out: String<512> = String::new();
        assert!(Reply::Config(&map).append_to(&mut out).is_ok());
        let first = out.len();

        assert!(Reply::Config(&map).append_to(&mut out).is_err());
        assert_eq!(out.len(), first);
        assert!(out.ends_with(EOL));

        assert!(Reply::Ok.append_to(&mut out).is_ok());
        assert!(out.ends_with("\r\nOK\r\n"));
    }

    #[test]
    fn simple_replies() {
        assert_eq!(render(Reply::Ok).as_str(), "OK\r\n");
        assert_eq!(render(Reply::Command(9)).as_str(), "CMD:9\r\n");
        assert_eq!(render(Reply::UnknownCommand).as_str(), "ERROR: Unknown command\r\n");
        assert_eq!(
            render(Reply::Stats {
                ram: Usage::new(1200, 2560),
                storage: Usage::new(119, 4096),
            })
            .as_str(),
            "SRAM: 1200/2560 B, EEPROM: 119/4096 B\r\n"
        );
    }
}
