//! A small library to parse command-line and environmental flags.
//!
//! Flags are grouped by a marker type and registered before `main` by [`define_flag!`].
//! A group is parsed once, from `--prefix:name=value` arguments and `PREFIX_NAME`
//! environment variables; arguments win over the environment.

use std::{
    any::TypeId,
    borrow::Cow,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagError {
    #[error("flag not found: {0}")]
    FlagNotFound(String),
    #[error("flags of {0} are already initialized")]
    FlagsAlreadyInitialized(&'static str),
    #[error("no flags registered for {0}")]
    NoFlags(&'static str),
}

/// Values a flag can hold.
pub trait FlagType: Clone + Send + 'static {
    const IS_BOOL: bool = false;

    fn parse_flag(argument: &str) -> Option<Self>;
}

impl FlagType for bool {
    const IS_BOOL: bool = true;

    fn parse_flag(argument: &str) -> Option<Self> {
        match argument {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

macro_rules! int_flag_type {
    ($($t: ty),*) => {
        $(
            impl FlagType for $t {
                fn parse_flag(argument: &str) -> Option<Self> {
                    let (digits, base) = if argument.len() > 2 && &argument[0..2] == "0x" {
                        (&argument[2..], 16)
                    } else if argument.len() > 1 && &argument[0..1] == "0" {
                        (&argument[1..], 8)
                    } else {
                        (argument, 10)
                    };

                    <$t>::from_str_radix(digits, base).ok()
                }
            }
        )*
    };
}

int_flag_type!(u32, u64, usize, i32, i64, isize);

impl FlagType for f64 {
    fn parse_flag(argument: &str) -> Option<Self> {
        argument.parse().ok()
    }
}

impl FlagType for String {
    fn parse_flag(argument: &str) -> Option<Self> {
        Some(argument.to_owned())
    }
}

/// Storage of one flag. Holds `None` until the flag is set.
pub struct FlagCell<T> {
    value: Mutex<Option<T>>,
}

impl<T: FlagType> FlagCell<T> {
    pub const fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn get_or(&self, default_value: impl FnOnce() -> T) -> T {
        self.value.lock().clone().unwrap_or_else(default_value)
    }

    pub fn set(&self, value: T) {
        *self.value.lock() = Some(value);
    }
}

impl<T: FlagType> Default for FlagCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

trait ErasedFlagCell: Send + Sync {
    fn set_from_string(&self, argument: &str) -> bool;
    fn is_bool(&self) -> bool;
}

impl<T: FlagType> ErasedFlagCell for FlagCell<T> {
    fn set_from_string(&self, argument: &str) -> bool {
        match T::parse_flag(argument) {
            Some(value) => {
                self.set(value);
                true
            }
            None => false,
        }
    }

    fn is_bool(&self) -> bool {
        T::IS_BOOL
    }
}

struct Flag {
    name: &'static str,
    comment: &'static str,
    is_set: AtomicBool,
    cell: &'static dyn ErasedFlagCell,
}

#[derive(Default)]
struct Flags {
    flags: Vec<&'static Flag>,
    initialized: bool,
}

/// A map of type-id -> flags.
static FLAGS_MAP: Mutex<Vec<(TypeId, Flags)>> = Mutex::new(Vec::new());

/// Flags registered for marker type `T`.
pub struct FlagsOf<T>(std::marker::PhantomData<T>);

impl<T: 'static> FlagsOf<T> {
    fn with<U>(f: impl FnOnce(&mut Flags) -> U) -> U {
        let mut map = FLAGS_MAP.lock();
        let id = TypeId::of::<T>();
        let index = match map.iter().position(|(type_id, _)| *type_id == id) {
            Some(index) => index,
            None => {
                map.push((id, Flags::default()));
                map.len() - 1
            }
        };
        f(&mut map[index].1)
    }

    fn registered() -> bool {
        let id = TypeId::of::<T>();
        FLAGS_MAP.lock().iter().any(|(type_id, _)| *type_id == id)
    }

    fn lookup(name: &str) -> Option<&'static Flag> {
        Self::with(|flags| flags.flags.iter().copied().find(|flag| flag.name == name))
    }

    pub fn is_set(name: &str) -> bool {
        Self::lookup(name).map_or(false, |flag| flag.is_set.load(Ordering::Relaxed))
    }

    fn add_flag(flag: &'static Flag) {
        Self::with(|flags| {
            if !flags.flags.iter().any(|existing| existing.name == flag.name) {
                flags.flags.push(flag);
            }
        });
    }

    fn set_flag_from_string(flag: &Flag, argument: &str) {
        if flag.cell.set_from_string(argument) {
            flag.is_set.store(true, Ordering::Relaxed);
        } else {
            log::warn!(
                target: "monitors::flags",
                "Ignoring flag: {} is an invalid value for flag {}",
                argument,
                flag.name
            );
        }
    }

    fn parse(option: &str) -> Result<(), FlagError> {
        let (name, argument) = match option.find('=') {
            Some(equals_pos) => (&option[..equals_pos], &option[equals_pos + 1..]),
            None => {
                const NO_1_PREFIX: &str = "no_";
                const NO_2_PREFIX: &str = "no-";

                if let Some(name) = option
                    .strip_prefix(NO_1_PREFIX)
                    .or_else(|| option.strip_prefix(NO_2_PREFIX))
                {
                    (name, "false")
                } else {
                    (option, "true")
                }
            }
        };

        let name = name.replace('-', "_");
        let Some(flag) = Self::lookup(&name) else {
            return Err(FlagError::FlagNotFound(name));
        };

        // `--name` and `--no-name` are only accepted for booleans.
        if !flag.cell.is_bool() && !option.contains('=') {
            log::warn!(
                target: "monitors::flags",
                "Ignoring flag: {} requires a value",
                flag.name
            );
            return Ok(());
        }

        Self::set_flag_from_string(flag, argument);
        Ok(())
    }

    fn process_command_line_flags(
        prefix: Option<&str>,
        args: impl Iterator<Item = String>,
    ) -> Result<(), FlagError> {
        let cli_prefix = prefix
            .map(|prefix| Cow::Owned(format!("--{}:", prefix)))
            .unwrap_or(Cow::Borrowed("--"));

        for arg in args {
            if let Some(option) = arg.strip_prefix(cli_prefix.as_ref()) {
                if !option.is_empty() {
                    Self::parse(option)?;
                }
            }
        }

        Ok(())
    }

    fn process_environmental_vars(prefix: Option<&str>, vars: impl Iterator<Item = (String, String)>) {
        let env_prefix = prefix
            .map(|prefix| format!("{}_", prefix.to_uppercase()))
            .unwrap_or_default();

        for (option, argument) in vars {
            let Some(name) = option.strip_prefix(&env_prefix) else {
                continue;
            };

            if let Some(flag) = Self::lookup(&name.to_lowercase()) {
                Self::set_flag_from_string(flag, &argument);
            }
        }
    }

    fn parse_all(
        prefix: Option<&str>,
        args: impl Iterator<Item = String>,
        env: impl Iterator<Item = (String, String)>,
    ) -> Result<(), FlagError> {
        if !Self::registered() {
            return Err(FlagError::NoFlags(std::any::type_name::<T>()));
        }

        if Self::with(|flags| std::mem::replace(&mut flags.initialized, true)) {
            return Err(FlagError::FlagsAlreadyInitialized(std::any::type_name::<T>()));
        }

        Self::process_environmental_vars(prefix, env);
        Self::process_command_line_flags(prefix, args)
    }
}

pub fn parse<T: 'static>(
    args: impl Iterator<Item = String>,
    env: impl Iterator<Item = (String, String)>,
) -> Result<(), FlagError> {
    FlagsOf::<T>::parse_all(None, args, env)
}

pub fn parse_with_prefix<T: 'static>(
    prefix: &str,
    args: impl Iterator<Item = String>,
    env: impl Iterator<Item = (String, String)>,
) -> Result<(), FlagError> {
    FlagsOf::<T>::parse_all(Some(prefix), args, env)
}

/// One line per flag of `T`: `  --name: comment`.
pub fn help<T: 'static>() -> String {
    FlagsOf::<T>::with(|flags| {
        flags
            .flags
            .iter()
            .map(|flag| format!("  --{}: {}\n", flag.name, flag.comment))
            .collect()
    })
}

/// Registers a flag of group `T` backed by `cell`.
#[doc(hidden)]
pub fn register<T: 'static, V: FlagType>(
    cell: &'static FlagCell<V>,
    name: &'static str,
    comment: &'static str,
) {
    let flag = Box::leak(Box::new(Flag {
        name,
        comment,
        is_set: AtomicBool::new(false),
        cell,
    }));
    FlagsOf::<T>::add_flag(flag);
}

#[doc(hidden)]
pub use paste;

/// Define a flag of group `$of`.
///
/// Generates `<of>_<name>()` returning the current value, `set_<of>_<name>()` and
/// `is_<of>_<name>_set()`.
#[macro_export]
macro_rules! define_flag {
    ($of: ident => $typ: ty, $name: ident, $default_value: expr, $comment: literal) => {
        $crate::utils::flags::paste::paste! {
            static [<$of: upper _ FLAG_ $name:upper>]: $crate::utils::flags::FlagCell<$typ> =
                $crate::utils::flags::FlagCell::new();

            #[doc(hidden)]
            #[ctor::ctor]
            fn [<init_ $of:lower _ $name _flag>]() {
                $crate::utils::flags::register::<$of, $typ>(
                    &[<$of: upper _ FLAG_ $name:upper>],
                    stringify!($name),
                    $comment,
                );
            }

            #[doc = $comment]
            pub fn [<$of: lower _ $name>]() -> $typ {
                [<$of: upper _ FLAG_ $name:upper>].get_or(|| $default_value)
            }

            pub fn [<set_ $of: lower _ $name>]($name: $typ) {
                [<$of: upper _ FLAG_ $name:upper>].set($name);
            }

            pub fn [<is_ $of: lower _ $name _set>]() -> bool {
                $crate::utils::flags::FlagsOf::<$of>::is_set(stringify!($name))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CliFlags;

    crate::define_flag!(CliFlags => u32, threshold, 0, "threshold in ms");
    crate::define_flag!(CliFlags => bool, verbose, false, "verbose output");
    crate::define_flag!(CliFlags => bool, enabled, true, "enabled");
    crate::define_flag!(CliFlags => String, label, String::from("none"), "label");

    struct EnvFlags;

    crate::define_flag!(EnvFlags => u32, sample_percent, 100, "sample percent");
    crate::define_flag!(EnvFlags => usize, limit, 16, "limit");

    struct UnknownFlags;

    crate::define_flag!(UnknownFlags => u32, known, 1, "known");

    struct Unregistered;

    fn args(args: &[&str]) -> impl Iterator<Item = String> {
        args.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn command_line_flags() {
        assert_eq!(cliflags_threshold(), 0);
        assert!(!is_cliflags_threshold_set());

        parse_with_prefix::<CliFlags>(
            "test",
            args(&[
                "--test:threshold=0x20",
                "--test:verbose",
                "--test:no-enabled",
                "--test:label=main",
                "--other:threshold=7",
                "positional",
            ]),
            std::iter::empty(),
        )
        .unwrap();

        assert_eq!(cliflags_threshold(), 32);
        assert!(is_cliflags_threshold_set());
        assert!(cliflags_verbose());
        assert!(!cliflags_enabled());
        assert_eq!(cliflags_label(), "main");

        assert_eq!(
            parse_with_prefix::<CliFlags>("test", std::iter::empty(), std::iter::empty()),
            Err(FlagError::FlagsAlreadyInitialized(
                std::any::type_name::<CliFlags>()
            ))
        );

        let help = help::<CliFlags>();
        assert!(help.contains("  --threshold: threshold in ms\n"));
    }

    #[test]
    fn environment_is_overridden_by_arguments() {
        parse_with_prefix::<EnvFlags>(
            "test",
            args(&["--test:limit=4"]),
            vec![
                ("TEST_SAMPLE_PERCENT".to_string(), "25".to_string()),
                ("TEST_LIMIT".to_string(), "8".to_string()),
                ("PATH".to_string(), "/bin".to_string()),
            ]
            .into_iter(),
        )
        .unwrap();

        assert_eq!(envflags_sample_percent(), 25);
        assert_eq!(envflags_limit(), 4);
    }

    #[test]
    fn unknown_and_invalid_flags() {
        assert_eq!(
            parse_with_prefix::<UnknownFlags>(
                "test",
                args(&["--test:known=nope", "--test:unknown=1"]),
                std::iter::empty(),
            ),
            Err(FlagError::FlagNotFound("unknown".to_string()))
        );
        assert_eq!(unknownflags_known(), 1);
        assert!(!is_unknownflags_known_set());

        assert_eq!(
            parse::<Unregistered>(std::iter::empty(), std::iter::empty()),
            Err(FlagError::NoFlags(std::any::type_name::<Unregistered>()))
        );
    }
}
