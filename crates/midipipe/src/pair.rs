use std::fmt;
use std::str::FromStr;

/// A comma-separated value pair where either side may be omitted.
///
/// Accepted forms: `N` (both sides `N`), `A,B`, `,B`, `A,`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pair<T> {
    pub first: Option<T>,
    pub second: Option<T>,
}

impl<T: Copy> Pair<T> {
    pub fn first_or(&self, default: T) -> T {
        self.first.unwrap_or(default)
    }

    pub fn second_or(&self, default: T) -> T {
        self.second.unwrap_or(default)
    }
}

impl<T> FromStr for Pair<T>
where
    T: FromStr + Copy,
    T::Err: fmt::Display,
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let side = |text: &str| -> Result<Option<T>, String> {
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<T>()
                .map(Some)
                .map_err(|err| format!("invalid value '{text}': {err}"))
        };

        let pair = match s.split_once(',') {
            None => {
                let value = side(s)?;
                Self {
                    first: value,
                    second: value,
                }
            }
            Some((first, second)) => Self {
                first: side(first)?,
                second: side(second)?,
            },
        };

        if pair.first.is_none() && pair.second.is_none() {
            return Err("expected N, A,B, ,B or A,".to_string());
        }
        Ok(pair)
    }
}
