//! Handlers for the legacy text commands.
//!
//! | Command | Arguments | Reply |
//! |---------|-----------|-------|
//! | `t` | register address speed dir | `<T register speed dir>`, none for consists |
//! | `tex` | address speed dir (`-1` = unchanged) | as `t` |
//! | `f` / `F` | address byte [byte2] | none |
//! | `fex` | address function state | none |
//! | `T` | none: list, `id`: delete, `id thrown`: set, `id addr subaddr`: define | `<H ...>` / `<O>` / none / `<X>` |
//! | `a` | board index activate | none |
//! | `s` | | `<p..>`, `<T ...>` and `<H id addr index thrown>` frames |
//! | `E` | | `<O>` after storing everything |
//! | `e` | | `<O>` after clearing everything |
//! | `!` | | `<O>` after an emergency stop |
//!
//! Throwing a turnout with `<T id thrown>` does not reply directly: the
//! resulting `<H id thrown>` is broadcast to every client.

use core::str::FromStr;

use crate::error::CommandError;
use crate::locomotive::{Direction, MAX_FUNCTION};
use crate::packet::MAX_SPEED_STEP;
use crate::station::Station;
use crate::traits::PacketSink;
use crate::turnout::TurnoutType;

use super::dispatcher::CommandRegistry;
use super::response::Response;

fn arg<'a>(args: &[&'a str], index: usize, name: &'static str) -> Result<&'a str, CommandError> {
    args.get(index)
        .copied()
        .ok_or(CommandError::MissingArgument(name))
}

fn parse<N: FromStr>(args: &[&str], index: usize, name: &'static str) -> Result<N, CommandError> {
    let raw = arg(args, index, name)?;
    raw.parse().map_err(|_| CommandError::InvalidArgument {
        name,
        value: raw.to_string(),
    })
}

fn parse_speed(args: &[&str], index: usize) -> Result<i8, CommandError> {
    let speed: i32 = parse(args, index, "speed")?;
    Ok(speed.clamp(-1, MAX_SPEED_STEP as i32) as i8)
}

/// Legacy direction flag: anything starting with `1` is forward.
fn parse_direction(args: &[&str], index: usize) -> Result<Direction, CommandError> {
    let raw = arg(args, index, "direction")?;
    Ok(Direction::from_flag(raw.starts_with('1')))
}

/// Register every station command on `commands`.
///
/// Returns the number of commands newly registered.
pub fn register_station_commands<T>(commands: &CommandRegistry, station: &Station<T>) -> usize
where
    T: PacketSink + Clone + 'static,
{
    let mut registered = 0;
    let mut add = |id: &str, registered_now: bool| {
        if registered_now {
            registered += 1;
        } else {
            tracing::debug!(id, "command already registered, keeping existing handler");
        }
    };

    let s = station.clone();
    add(
        "t",
        commands.register_command("t", move |args| {
            let register: u8 = parse(args, 0, "register")?;
            let address: u16 = parse(args, 1, "address")?;
            let speed = parse_speed(args, 2)?;
            let direction = parse_direction(args, 3)?;
            let outcome = s
                .locos()
                .resolve_for_throttle(register, address, speed, direction)?;
            Ok(outcome.reply().map_or(Response::NoResponse, Response::Status))
        }),
    );

    let s = station.clone();
    add(
        "tex",
        commands.register_command("tex", move |args| {
            let address: u16 = parse(args, 0, "address")?;
            let speed: i16 = parse(args, 1, "speed")?;
            let direction: i8 = parse(args, 2, "direction")?;
            let outcome = s
                .locos()
                .resolve_for_throttle_ex(address, speed, direction)?;
            Ok(outcome.reply().map_or(Response::NoResponse, Response::Status))
        }),
    );

    for id in ["f", "F"] {
        let s = station.clone();
        add(
            id,
            commands.register_command(id, move |args| {
                let address: u16 = parse(args, 0, "address")?;
                let primary: u8 = parse(args, 1, "function byte")?;
                let secondary: Option<u8> = if args.len() > 2 {
                    Some(parse(args, 2, "second function byte")?)
                } else {
                    None
                };
                s.locos()
                    .decode_function_bytes(address, primary, secondary)?;
                Ok(Response::NoResponse)
            }),
        );
    }

    let s = station.clone();
    add(
        "fex",
        commands.register_command("fex", move |args| {
            let address: u16 = parse(args, 0, "address")?;
            let function: u8 = parse(args, 1, "function")?;
            if function > MAX_FUNCTION {
                return Err(CommandError::InvalidArgument {
                    name: "function",
                    value: function.to_string(),
                });
            }
            let state: u8 = parse(args, 2, "state")?;
            s.locos().set_function(address, function, state != 0)?;
            Ok(Response::NoResponse)
        }),
    );

    let s = station.clone();
    add(
        "T",
        commands.register_command("T", move |args| {
            let turnouts = s.turnouts();
            match args.len() {
                0 => Ok(Response::from_lines(turnouts.status_lines())),
                1 => {
                    let id: u16 = parse(args, 0, "id")?;
                    Ok(if turnouts.remove(id) {
                        Response::Success
                    } else {
                        Response::Failed
                    })
                }
                2 => {
                    let id: u16 = parse(args, 0, "id")?;
                    let thrown: u8 = parse(args, 1, "thrown")?;
                    turnouts.set(id, thrown == 1)?;
                    Ok(Response::NoResponse)
                }
                3 => {
                    let id: u16 = parse(args, 0, "id")?;
                    let address: u16 = parse(args, 1, "address")?;
                    let index: i16 = parse(args, 2, "subaddress")?;
                    turnouts.create_or_update(id, address, index, TurnoutType::default());
                    Ok(Response::Success)
                }
                _ => Ok(Response::Failed),
            }
        }),
    );

    let s = station.clone();
    add(
        "a",
        commands.register_command("a", move |args| {
            let board: u16 = parse(args, 0, "board address")?;
            let index: u8 = parse(args, 1, "board index")?;
            let activate: u8 = parse(args, 2, "activate")?;
            s.send_accessory(board, index, activate == 1);
            Ok(Response::NoResponse)
        }),
    );

    let s = station.clone();
    add(
        "s",
        commands.register_command("s", move |_| Ok(Response::Status(s.status_lines().concat()))),
    );

    let s = station.clone();
    add(
        "E",
        commands.register_command("E", move |_| {
            s.store();
            Ok(Response::Success)
        }),
    );

    let s = station.clone();
    add(
        "e",
        commands.register_command("e", move |_| {
            s.clear();
            Ok(Response::Success)
        }),
    );

    let s = station.clone();
    add(
        "!",
        commands.register_command("!", move |_| {
            s.locos().emergency_stop();
            Ok(Response::Success)
        }),
    );

    registered
}
