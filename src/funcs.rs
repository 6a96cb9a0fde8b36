//! Template helper functions.
//!
//! | name        | call                        | result                              |
//! |-------------|-----------------------------|-------------------------------------|
//! | `count`     | `count "%03d"`              | next counter value, formatted       |
//! | `ext`       | `ext .Info.Name`            | extension incl. dot, or empty       |
//! | `chTimes`   | `chTimes .From time`        | sets atime+mtime (live only); empty |
//! | `parseTime` | `parseTime layout value`    | timestamp                           |
//! | `printf`    | `printf "%s-%d" a b`        | formatted string                    |
//! | `print`     | `print a b`                 | arguments joined by spaces          |
//! | `len`       | `len .Info.Name`            | byte length of a string             |

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use filetime::FileTime;
use owo_colors::OwoColorize;
use regex::Regex;

use crate::template::{FuncMap, Value};
use crate::timefmt;

pub const NAMES: &[&str] = &["count", "ext", "chTimes", "parseTime", "printf", "print", "len"];

/// Running counter for `count`; first call yields 1.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Counter {
    current: i64,
}

impl Counter {
    pub fn next(&mut self) -> i64 {
        self.current += 1;
        self.current
    }

    pub fn current(&self) -> i64 {
        self.current
    }
}

/// A `chTimes` call, recorded whether or not it touched the filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampChange {
    pub path:    PathBuf,
    pub time:    DateTime<FixedOffset>,
    pub applied: bool,
}

/// State shared by all helper calls of one run.
#[derive(Debug)]
pub struct Helpers {
    dry_run:    bool,
    counter:    Counter,
    timestamps: Vec<TimestampChange>,
}

impl Helpers {
    pub fn new(dry_run: bool) -> Self {
        Helpers { dry_run, counter: Counter::default(), timestamps: Vec::new() }
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    pub fn timestamp_changes(&self) -> &[TimestampChange] {
        &self.timestamps
    }

    fn count(&mut self, args: &[Value]) -> Result<Value, String> {
        let [Value::Str(format)] = args else {
            return Err(format!("count: want 1 string argument, got {}", describe(args)));
        };
        if !has_verb(format) {
            return Err(format!("count: format {:?} has no verb for the counter", format));
        }
        let n = self.counter.next();
        sprintf(format, &[Value::Int(n)]).map(Value::Str)
    }

    fn ch_times(&mut self, args: &[Value]) -> Result<Value, String> {
        let [Value::Str(path), Value::Time(time)] = args else {
            return Err(format!("chTimes: want (string, time), got {}", describe(args)));
        };
        println!("Change file {} timestamp to {}", path.green(), timefmt::display(time).cyan());

        if !self.dry_run {
            let ft = FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
            filetime::set_file_times(Path::new(path), ft, ft).map_err(|e| format!("chTimes {}: {}", path, e))?;
        }
        self.timestamps.push(TimestampChange { path: PathBuf::from(path), time: *time, applied: !self.dry_run });
        Ok(Value::Str(String::new()))
    }
}

impl FuncMap for Helpers {
    fn defines(&self, name: &str) -> bool {
        NAMES.contains(&name)
    }

    #[tracing::instrument(skip(self))]
    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        match name {
            "count" => self.count(&args),
            "ext" => match args.as_slice() {
                [Value::Str(path)] => Ok(Value::Str(ext(path).to_string())),
                _ => Err(format!("ext: want 1 string argument, got {}", describe(&args))),
            },
            "chTimes" => self.ch_times(&args),
            "parseTime" => match args.as_slice() {
                [Value::Str(layout), Value::Str(value)] => timefmt::parse(layout, value).map(Value::Time),
                _ => Err(format!("parseTime: want (string, string), got {}", describe(&args))),
            },
            "printf" => match args.split_first() {
                Some((Value::Str(format), rest)) => sprintf(format, rest).map(Value::Str),
                _ => Err(format!("printf: want a format string, got {}", describe(&args))),
            },
            "print" => {
                let parts = args.iter().map(Value::to_text).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Str(parts.join(" ")))
            }
            "len" => match args.as_slice() {
                [Value::Str(s)] => Ok(Value::Int(i64::try_from(s.len()).unwrap_or(i64::MAX))),
                _ => Err(format!("len: want 1 string argument, got {}", describe(&args))),
            },
            _ => Err(format!("function {:?} not defined", name)),
        }
    }
}

fn describe(args: &[Value]) -> String {
    let types: Vec<_> = args.iter().map(Value::type_name).collect();
    format!("({})", types.join(", "))
}

/// Extension of the final path element, including the dot.
///
/// `photo.JPG` -> `.JPG`, `a.tar.gz` -> `.gz`, `README` -> ``, `.bashrc` -> `.bashrc`.
pub fn ext(path: &str) -> &str {
    let base_start = path.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let base = &path[base_start..];
    base.rfind('.').map_or("", |i| &base[i..])
}

static VERB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%(?P<flags>[-+ 0#]*)(?P<width>\d+)?(?:\.(?P<prec>\d+))?(?P<verb>[a-zA-Z%])").expect("valid, static regex")
});

fn has_verb(format: &str) -> bool {
    VERB_RE.captures_iter(format).any(|cap| &cap["verb"] != "%")
}

/// printf-style formatting.
///
/// Verbs: `%d %s %v %q %x %X %o %b %%`; flags `- + 0 space`; width; precision
/// truncates `%s`/`%v`. Type mismatches and missing or extra arguments are errors.
pub fn sprintf(format: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut last = 0;

    for cap in VERB_RE.captures_iter(format) {
        let whole = cap.get(0).ok_or("empty verb match")?;
        out.push_str(&format[last..whole.start()]);
        last = whole.end();

        let verb = &cap["verb"];
        if verb == "%" {
            out.push('%');
            continue;
        }
        let spec = Spec { flags:     cap.name("flags").map_or("", |m| m.as_str()),
                          width:     cap.name("width").and_then(|m| m.as_str().parse().ok()),
                          precision: cap.name("prec").and_then(|m| m.as_str().parse().ok()) };
        let arg = args.next().ok_or_else(|| format!("missing argument for %{}", verb))?;
        out.push_str(&spec.apply(verb, arg)?);
    }
    out.push_str(&format[last..]);

    if let Some(extra) = args.next() {
        return Err(format!("extra argument {} for format {:?}", extra.type_name(), format));
    }
    Ok(out)
}

struct Spec<'a> {
    flags:     &'a str,
    width:     Option<usize>,
    precision: Option<usize>,
}

impl Spec<'_> {
    fn apply(&self, verb: &str, arg: &Value) -> Result<String, String> {
        let body: String = match (verb, arg) {
            ("d", Value::Int(n)) => return Ok(self.pad_number(*n, n.unsigned_abs().to_string())),
            ("x", Value::Int(n)) => return Ok(self.pad_number(*n, format!("{:x}", n.unsigned_abs()))),
            ("X", Value::Int(n)) => return Ok(self.pad_number(*n, format!("{:X}", n.unsigned_abs()))),
            ("o", Value::Int(n)) => return Ok(self.pad_number(*n, format!("{:o}", n.unsigned_abs()))),
            ("b", Value::Int(n)) => return Ok(self.pad_number(*n, format!("{:b}", n.unsigned_abs()))),
            ("x", Value::Str(s)) => s.bytes().map(|b| format!("{:02x}", b)).collect(),
            ("X", Value::Str(s)) => s.bytes().map(|b| format!("{:02X}", b)).collect(),
            ("q", Value::Str(s)) => format!("{:?}", s),
            ("s" | "v", value) => {
                let text = value.to_text()?;
                match self.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                }
            }
            _ => return Err(format!("bad verb %{} for {}", verb, arg.type_name())),
        };
        Ok(self.pad(body))
    }

    fn pad(&self, body: String) -> String {
        let width = self.width.unwrap_or(0);
        let len = body.chars().count();
        if len >= width {
            return body;
        }
        let fill = " ".repeat(width - len);
        if self.flags.contains('-') {
            body + &fill
        } else {
            fill + &body
        }
    }

    fn pad_number(&self, n: i64, digits: String) -> String {
        let sign = if n < 0 {
            "-"
        } else if self.flags.contains('+') {
            "+"
        } else if self.flags.contains(' ') {
            " "
        } else {
            ""
        };
        let width = self.width.unwrap_or(0);
        if self.flags.contains('0') && !self.flags.contains('-') && sign.len() + digits.len() < width {
            let zeros = "0".repeat(width - sign.len() - digits.len());
            return format!("{}{}{}", sign, zeros, digits);
        }
        self.pad(format!("{}{}", sign, digits))
    }
}
