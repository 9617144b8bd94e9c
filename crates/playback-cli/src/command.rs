//! Line commands read from stdin.

use anyhow::{Context, Result, anyhow, bail};
use playback_engine::timefmt;

#[derive(Debug, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    /// Absolute seek in milliseconds.
    Seek(i64),
    /// Relative seek in milliseconds.
    Skip(i64),
    Fraction(u32),
    Speed(f64),
    FastForward(f64),
    Rewind(f64),
    Volume(f64),
    Mute(bool),
    Select(u64, u64),
    Unselect,
    Timestamp,
    Goto(String),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
play | pause | toggle
seek <time>        absolute, [[H:]M:]S[.fff]
+<ms> | -<ms>      relative
pct <permille>     0..1000 of the duration
speed <f>          0.1..2.0
ff <f> | rew <f>   play forwards / backwards at <f> to the end of the range
vol <f>            0.0..1.0
mute | unmute
sel <a> <b>        bound playback to [a, b]
unsel
ts                 print a timestamp for the current position
goto <timestamp>
status | help | quit";

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix('+') {
            return Ok(Command::Skip(parse_ms(rest)?));
        }
        if let Some(rest) = line.strip_prefix('-') {
            return Ok(Command::Skip(-parse_ms(rest)?));
        }

        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let mut arg = || words.next().ok_or_else(|| anyhow!("{verb}: missing argument"));

        let cmd = match verb {
            "play" => Command::Play,
            "pause" => Command::Pause,
            "toggle" | "p" => Command::Toggle,
            "seek" => {
                let text = arg()?;
                let ms = timefmt::parse_time(text).ok_or_else(|| anyhow!("bad time {text:?}"))?;
                Command::Seek(i64::try_from(ms).context("time too large")?)
            }
            "pct" => Command::Fraction(arg()?.parse().context("pct")?),
            "speed" => Command::Speed(arg()?.parse().context("speed")?),
            "ff" | "fastforward" => Command::FastForward(arg()?.parse().context("ff")?),
            "rew" | "rewind" => Command::Rewind(arg()?.parse().context("rew")?),
            "vol" => Command::Volume(arg()?.parse().context("vol")?),
            "mute" => Command::Mute(true),
            "unmute" => Command::Mute(false),
            "sel" => {
                let a = arg()?;
                let b = arg()?;
                let start = timefmt::parse_time(a).ok_or_else(|| anyhow!("bad time {a:?}"))?;
                let end = timefmt::parse_time(b).ok_or_else(|| anyhow!("bad time {b:?}"))?;
                Command::Select(start, end)
            }
            "unsel" => Command::Unselect,
            "ts" => Command::Timestamp,
            "goto" => Command::Goto(arg()?.to_string()),
            "status" | "s" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,
            other => bail!("unknown command {other:?}"),
        };
        Ok(cmd)
    }
}

fn parse_ms(text: &str) -> Result<i64> {
    text.trim()
        .parse()
        .with_context(|| format!("bad offset {text:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_words() {
        assert_eq!(Command::parse("play").unwrap(), Command::Play);
        assert_eq!(Command::parse("  pause ").unwrap(), Command::Pause);
        assert_eq!(Command::parse("q").unwrap(), Command::Quit);
        assert_eq!(Command::parse("unmute").unwrap(), Command::Mute(false));
    }

    #[test]
    fn parses_seeks() {
        assert_eq!(Command::parse("seek 1:30").unwrap(), Command::Seek(90_000));
        assert_eq!(Command::parse("+5000").unwrap(), Command::Skip(5_000));
        assert_eq!(Command::parse("-250").unwrap(), Command::Skip(-250));
        assert_eq!(Command::parse("pct 500").unwrap(), Command::Fraction(500));
        assert_eq!(Command::parse("ff 1.5").unwrap(), Command::FastForward(1.5));
        assert_eq!(Command::parse("rewind -2").unwrap(), Command::Rewind(-2.0));
    }

    #[test]
    fn parses_selection_and_timestamps() {
        assert_eq!(
            Command::parse("sel 10 1:00").unwrap(),
            Command::Select(10_000, 60_000)
        );
        assert_eq!(
            Command::parse("goto #1:05.4#").unwrap(),
            Command::Goto("#1:05.4#".to_string())
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("seek").is_err());
        assert!(Command::parse("seek soon").is_err());
        assert!(Command::parse("speed fast").is_err());
        assert!(Command::parse("rewind").is_err());
    }
}
