//! Command formatting for set-templates and channel substitution.
//!
//! Two substitution styles are accepted, never both in one template:
//!
//! - **Brace**: `"sx {0}"`, `"G{0}?"`, `"CH{0}:V {1}"`. Fields are positional. A bare `{}`
//!   takes the next index. Rendering goes through `strfmt`, so width, fill and alignment
//!   specs (`{0:>8}`) work. Numeric precision belongs in `%`-style templates.
//! - **Percent**: `"sx %s"`, `"RES s %f"`, `"V%d %.3e"`. printf conversions
//!   `d i u f F e E g G x X o c s` with flags `-+ 0#`, width and precision. `%%` is a
//!   literal percent sign.
//!
//! A template with no fields at all is sent verbatim.

use crate::error::{BusError, BusResult};
use crate::value::Value;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Matches brace fields like `{0}`, `{}` or `{1:>8}`.
static BRACE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d*)(:[^{}]*)?\}").expect("Invalid brace field regex"));

/// Matches printf conversion specs, including `%%`.
static PERCENT_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%([-+ 0#]*)(\d+)?(?:\.(\d+))?([sdiufFeEgGxXoc%])")
        .expect("Invalid percent spec regex")
});

/// Substitution style found in a command template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStyle {
    /// No substitution fields
    Literal,
    /// `{0}` fields
    Brace,
    /// `%s` conversions
    Percent,
}

/// Work out which substitution style `template` uses.
///
/// Alongside brace fields, a `%` followed by a space (`"50% duty {0}"`) is literal text,
/// not a space-flagged conversion.
///
/// # Errors
/// Returns [`BusError::Template`] if the template mixes both styles.
pub fn detect_style(template: &str) -> BusResult<FormatStyle> {
    let brace = BRACE_FIELD.is_match(template);
    let mut percent = false;
    let mut unambiguous_percent = false;
    for caps in PERCENT_SPEC.captures_iter(template) {
        if &caps[4] == "%" {
            continue;
        }
        percent = true;
        if !caps[1].contains(' ') {
            unambiguous_percent = true;
        }
    }
    match (brace, percent) {
        (true, _) if unambiguous_percent => Err(BusError::Template(format!(
            "template '{template}' mixes brace and % substitution styles"
        ))),
        (true, _) => Ok(FormatStyle::Brace),
        (false, true) => Ok(FormatStyle::Percent),
        (false, false) => Ok(FormatStyle::Literal),
    }
}

/// Substitute `args` into `template`, in order.
pub fn format_command(template: &str, args: &[Value]) -> BusResult<String> {
    match detect_style(template)? {
        FormatStyle::Literal => Ok(template.to_string()),
        FormatStyle::Brace => format_brace(template, args),
        FormatStyle::Percent => format_percent(template, args),
    }
}

fn format_brace(template: &str, args: &[Value]) -> BusResult<String> {
    let mut next = 0usize;
    let mut highest: Option<usize> = None;
    let mut numbering_error = None;
    let numbered = BRACE_FIELD.replace_all(template, |caps: &Captures| {
        let index = if caps[1].is_empty() {
            next += 1;
            next - 1
        } else {
            match caps[1].parse::<usize>() {
                Ok(index) => index,
                Err(e) => {
                    numbering_error = Some(e.to_string());
                    0
                }
            }
        };
        highest = Some(highest.map_or(index, |h| h.max(index)));
        let spec = caps.get(2).map_or("", |m| m.as_str());
        format!("{{{index}{spec}}}")
    });
    if let Some(reason) = numbering_error {
        return Err(BusError::Template(format!(
            "bad field index in '{template}': {reason}"
        )));
    }
    if let Some(highest) = highest {
        if highest >= args.len() {
            return Err(BusError::Template(format!(
                "template '{template}' refers to field {highest} but only {} value(s) were given",
                args.len()
            )));
        }
    }

    let vars: HashMap<String, String> = args
        .iter()
        .enumerate()
        .map(|(index, value)| (index.to_string(), value.to_string()))
        .collect();
    strfmt::strfmt(&numbered, &vars)
        .map_err(|e| BusError::Template(format!("could not format '{template}': {e}")))
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn from_captures(caps: &Captures) -> Self {
        let flags = caps.get(1).map_or("", |m| m.as_str());
        Self {
            left: flags.contains('-'),
            plus: flags.contains('+'),
            space: flags.contains(' '),
            zero: flags.contains('0'),
            alternate: flags.contains('#'),
            width: caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            precision: caps.get(3).and_then(|m| m.as_str().parse().ok()),
        }
    }

    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }

    /// Pad a number split into sign, prefix and digits.
    fn pad_number(&self, sign: &str, prefix: &str, digits: &str) -> String {
        let len = sign.len() + prefix.len() + digits.len();
        if len >= self.width {
            return format!("{sign}{prefix}{digits}");
        }
        let fill = self.width - len;
        if self.left {
            format!("{sign}{prefix}{digits}{}", " ".repeat(fill))
        } else if self.zero {
            format!("{sign}{prefix}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{sign}{prefix}{digits}", " ".repeat(fill))
        }
    }

    fn pad_text(&self, text: &str) -> String {
        let len = text.chars().count();
        if len >= self.width {
            text.to_string()
        } else if self.left {
            format!("{text}{}", " ".repeat(self.width - len))
        } else {
            format!("{}{text}", " ".repeat(self.width - len))
        }
    }
}

fn as_integer(value: &Value, template: &str) -> BusResult<i128> {
    match value {
        Value::Int(i) => Ok(i128::from(*i)),
        Value::Uint(u) => Ok(i128::from(*u)),
        Value::Float(f) if f.is_finite() => Ok(f.trunc() as i128),
        Value::Text(s) => s.trim().parse::<i128>().map_err(|_| {
            BusError::Template(format!("'{s}' is not an integer for template '{template}'"))
        }),
        Value::Float(f) => Err(BusError::Template(format!(
            "{f} cannot be formatted as an integer for template '{template}'"
        ))),
    }
}

fn as_float(value: &Value, template: &str) -> BusResult<f64> {
    match value {
        Value::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            BusError::Template(format!("'{s}' is not a number for template '{template}'"))
        }),
        other => other.as_f64().ok_or_else(|| {
            BusError::Template(format!("{other} is not a number for template '{template}'"))
        }),
    }
}

/// C-style exponent: at least two digits, explicit sign.
fn exponent_form(value: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{value:.precision$e}");
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{:02}", exponent.abs())
}

fn strip_fraction_zeros(digits: &str) -> String {
    if !digits.contains('.') {
        return digits.to_string();
    }
    digits.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn general_form(value: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let precision = precision.max(1);
    let exponent = if value == 0.0 {
        0
    } else {
        let sci = format!("{:.*e}", precision - 1, value);
        sci.split_once('e')
            .and_then(|(_, exp)| exp.parse::<i64>().ok())
            .unwrap_or(0)
    };
    if exponent >= -4 && exponent < precision as i64 {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        let fixed = format!("{value:.decimals$}");
        if alternate {
            fixed
        } else {
            strip_fraction_zeros(&fixed)
        }
    } else {
        let sci = exponent_form(value, precision - 1, upper);
        if alternate {
            return sci;
        }
        match sci.split_once(['e', 'E']) {
            Some((mantissa, rest)) => {
                let e = if upper { 'E' } else { 'e' };
                format!("{}{e}{rest}", strip_fraction_zeros(mantissa))
            }
            None => sci,
        }
    }
}

fn non_finite(value: f64, upper: bool) -> String {
    let text = if value.is_nan() { "nan" } else { "inf" };
    if upper {
        text.to_uppercase()
    } else {
        text.to_string()
    }
}

fn convert(conversion: &str, spec: &Spec, value: &Value, template: &str) -> BusResult<String> {
    let rendered = match conversion {
        "s" => {
            let text = value.to_string();
            let text = match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            };
            spec.pad_text(&text)
        }
        "c" => {
            let ch = match value {
                Value::Text(s) => s.chars().next().ok_or_else(|| {
                    BusError::Template(format!("empty string for %c in '{template}'"))
                })?,
                other => {
                    let code = as_integer(other, template)?;
                    u32::try_from(code)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| {
                            BusError::Template(format!("{code} is not a character code"))
                        })?
                }
            };
            spec.pad_text(&ch.to_string())
        }
        "d" | "i" | "u" => {
            let n = as_integer(value, template)?;
            spec.pad_number(spec.sign(n < 0), "", &n.unsigned_abs().to_string())
        }
        "x" | "X" | "o" => {
            let n = as_integer(value, template)?;
            let magnitude = n.unsigned_abs();
            let (prefix, digits) = match conversion {
                "x" => ("0x", format!("{magnitude:x}")),
                "X" => ("0X", format!("{magnitude:X}")),
                _ => ("0o", format!("{magnitude:o}")),
            };
            let prefix = if spec.alternate { prefix } else { "" };
            spec.pad_number(spec.sign(n < 0), prefix, &digits)
        }
        "f" | "F" | "e" | "E" | "g" | "G" => {
            let v = as_float(value, template)?;
            let upper = conversion.chars().all(|c| c.is_ascii_uppercase());
            let digits = if !v.is_finite() {
                non_finite(v.abs(), upper)
            } else {
                let precision = spec.precision.unwrap_or(6);
                match conversion {
                    "f" | "F" => format!("{:.precision$}", v.abs()),
                    "e" | "E" => exponent_form(v.abs(), precision, upper),
                    _ => general_form(v.abs(), precision, upper, spec.alternate),
                }
            };
            let negative = v.is_sign_negative() && !v.is_nan() && v != 0.0;
            spec.pad_number(spec.sign(negative), "", &digits)
        }
        other => {
            return Err(BusError::Template(format!(
                "unsupported conversion %{other} in '{template}'"
            )))
        }
    };
    Ok(rendered)
}

fn format_percent(template: &str, args: &[Value]) -> BusResult<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut last = 0usize;
    let mut used = 0usize;
    for caps in PERCENT_SPEC.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        let conversion = &caps[4];
        if conversion == "%" {
            out.push('%');
            continue;
        }
        let value = args.get(used).ok_or_else(|| {
            BusError::Template(format!(
                "not enough values for template '{template}' ({} given)",
                args.len()
            ))
        })?;
        used += 1;
        out.push_str(&convert(conversion, &Spec::from_captures(&caps), value, template)?);
    }
    out.push_str(&template[last..]);

    if used != args.len() {
        return Err(BusError::Template(format!(
            "template '{template}' takes {used} value(s) but {} were given",
            args.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(template: &str, args: &[Value]) -> String {
        format_command(template, args).unwrap()
    }

    #[test]
    fn brace_and_percent_give_the_same_command() {
        assert_eq!(fmt("sx {0}", &["y".into()]), "sx y");
        assert_eq!(fmt("sx %s", &["y".into()]), "sx y");
    }

    #[test]
    fn channel_precedes_value() {
        assert_eq!(fmt("CH{0}:V {1}", &[3u32.into(), 1.5.into()]), "CH3:V 1.5");
        assert_eq!(fmt("CH%d:V %.2f", &[3u32.into(), 1.5.into()]), "CH3:V 1.50");
    }

    #[test]
    fn auto_numbered_braces() {
        assert_eq!(fmt("G{}?", &[3i64.into()]), "G3?");
        assert_eq!(fmt("{} {}", &["a".into(), "b".into()]), "a b");
    }

    #[test]
    fn brace_alignment_goes_through_strfmt() {
        assert_eq!(fmt("[{0:>4}]", &["ab".into()]), "[  ab]");
    }

    #[test]
    fn mixed_styles_are_rejected() {
        let err = format_command("G{0} %d", &[1i64.into(), 2i64.into()]).unwrap_err();
        assert!(matches!(err, BusError::Template(_)));
    }

    #[test]
    fn literal_percent_is_not_a_field() {
        assert_eq!(detect_style("100%% {0}").unwrap(), FormatStyle::Brace);
        assert_eq!(fmt("RATE %d%%", &[5i64.into()]), "RATE 5%");
    }

    #[test]
    fn percent_before_a_space_stays_literal_in_brace_templates() {
        assert_eq!(detect_style("PWR {0} at 50% duty").unwrap(), FormatStyle::Brace);
        assert_eq!(
            fmt("PWR {0} at 50% duty", &[12i64.into()]),
            "PWR 12 at 50% duty"
        );
        assert_eq!(fmt("FAN {0} 50% off", &["A".into()]), "FAN A 50% off");
        assert_eq!(fmt("V% d", &[7i64.into()]), "V 7");
    }

    #[test]
    fn literal_template_is_verbatim() {
        assert_eq!(fmt("*IDN?", &[]), "*IDN?");
    }

    #[test]
    fn argument_count_must_match() {
        assert!(format_command("%d %d", &[1i64.into()]).is_err());
        assert!(format_command("%d", &[1i64.into(), 2i64.into()]).is_err());
        assert!(format_command("{1}", &[1i64.into()]).is_err());
    }

    #[test]
    fn integer_conversions() {
        assert_eq!(fmt("%05d", &[42i64.into()]), "00042");
        assert_eq!(fmt("%+d", &[42i64.into()]), "+42");
        assert_eq!(fmt("%-4d|", &[7i64.into()]), "7   |");
        assert_eq!(fmt("%d", &[2.7.into()]), "2");
        assert_eq!(fmt("%x", &[255i64.into()]), "ff");
        assert_eq!(fmt("%#X", &[255i64.into()]), "0XFF");
        assert_eq!(fmt("%o", &[8i64.into()]), "10");
        assert_eq!(fmt("%04X", &[10i64.into()]), "000A");
    }

    #[test]
    fn float_conversions() {
        assert_eq!(fmt("%f", &[0.04.into()]), "0.040000");
        assert_eq!(fmt("%.3f", &[(-1.23456).into()]), "-1.235");
        assert_eq!(fmt("%e", &[1500.0.into()]), "1.500000e+03");
        assert_eq!(fmt("%.2E", &[0.00012.into()]), "1.20E-04");
        assert_eq!(fmt("%g", &[0.0001.into()]), "0.0001");
        assert_eq!(fmt("%g", &[1234567.0.into()]), "1.23457e+06");
        assert_eq!(fmt("%g", &[100.0.into()]), "100");
        assert_eq!(fmt("%g", &[0.0.into()]), "0");
        assert_eq!(fmt("%f", &[2i64.into()]), "2.000000");
    }

    #[test]
    fn char_and_string_conversions() {
        assert_eq!(fmt("%c", &[65i64.into()]), "A");
        assert_eq!(fmt("%c", &["xyz".into()]), "x");
        assert_eq!(fmt("%.2s", &["abc".into()]), "ab");
        assert_eq!(fmt("%5s", &["ab".into()]), "   ab");
    }

    #[test]
    fn text_that_is_not_numeric_is_rejected() {
        assert!(format_command("%d", &["abc".into()]).is_err());
        assert!(format_command("%f", &["abc".into()]).is_err());
    }
}
