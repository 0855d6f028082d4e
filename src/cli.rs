//! Presentation glue for the interactive prompt.
//!
//! Turns input lines into logical commands and renders pairing results.
//! All validation errors come from the engine's own constructors; this
//! module never touches the transport.

use crate::{
   buds::{
      codec::BatteryLevels,
      protocol::{Command, EqPreset, FnPreset, Side, Toggle},
   },
   error::{BudsError, Result},
};

/// Cells in a battery bar; each stands for 20%.
const BAR_CELLS: usize = 5;

/// One line of user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCommand {
   /// Blank line; nothing to do.
   Empty,
   /// A command for the device.
   Device(Command),
   /// Close the session and leave.
   Exit,
}

/// Parses one input line.
///
/// Surface: `pair`, `GM ON|OFF`, `Spatial ON|OFF`, `FN <side> <preset>`,
/// `SP <preset>`, `exit`.
pub fn parse_line(line: &str) -> Result<CliCommand> {
   let mut words = line.split_whitespace();
   let Some(head) = words.next() else {
      return Ok(CliCommand::Empty);
   };

   let command = match head {
      "exit" => return Ok(CliCommand::Exit),
      "pair" => Command::Pair,
      "GM" => Command::SetGameMode(Toggle::parse(next_arg(&mut words, "ON|OFF")?)?),
      "Spatial" => Command::SetSpatial(Toggle::parse(next_arg(&mut words, "ON|OFF")?)?),
      "FN" => {
         let side = Side::parse(next_arg(&mut words, "left|right")?)?;
         let preset = FnPreset::parse(next_arg(&mut words, "preset")?)?;
         Command::SetFunction(side, preset)
      },
      "SP" => Command::SetEqPreset(EqPreset::parse(next_arg(&mut words, "preset")?)?),
      other => {
         return Err(BudsError::InvalidArgument(format!(
            "unknown command `{other}`"
         )));
      },
   };
   Ok(CliCommand::Device(command))
}

fn next_arg<'a>(words: &mut impl Iterator<Item = &'a str>, expected: &str) -> Result<&'a str> {
   words
      .next()
      .ok_or_else(|| BudsError::InvalidArgument(format!("missing argument: {expected}")))
}

fn battery_bar(percent: u8) -> String {
   let filled = (usize::from(percent.min(100)) / 20).min(BAR_CELLS);
   format!(
      "[{}{}] {percent}%",
      "■".repeat(filled),
      "-".repeat(BAR_CELLS - filled)
   )
}

/// Renders the three-column battery status learned from pairing.
pub fn render_battery_status(battery: &BatteryLevels) -> String {
   let line = format!(
      "{:<10} {}    |    {:<10} {}    |    {:<10} {}",
      "left",
      battery_bar(battery.left),
      "right",
      battery_bar(battery.right),
      "case",
      battery_bar(battery.case),
   );
   let rule = "-".repeat(line.chars().count());
   format!("{rule}\n{line}\n{rule}")
}
