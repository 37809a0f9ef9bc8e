//! Per-tick player commands: sampling, fixed-size wire codec, per-entity buffering

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::SimError;
use crate::util::time::Tick;

/// Encoded size of a [`Command`]
pub const COMMAND_WIRE_SIZE: usize = 19;
/// Encoded size of a [`TickedCommand`] (tick prefix + command)
pub const TICKED_COMMAND_WIRE_SIZE: usize = 8 + COMMAND_WIRE_SIZE;

bitflags::bitflags! {
    /// Buttons held down during the tick
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct HeldButtons: u8 {
        const SPRINT = 1 << 0;
        const AIM = 1 << 1;
        const MELEE = 1 << 2;
        const GRENADE = 1 << 3;
        const INSPECT = 1 << 4;
        const RELOAD = 1 << 5;
        const FIRE = 1 << 6;
    }
}

bitflags::bitflags! {
    /// One-shot buttons pressed since the previous tick
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PressedButtons: u8 {
        const JUMP = 1 << 0;
        const HOLSTER = 1 << 1;
    }
}

/// One tick's worth of input for one controlled entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Strafe axis, -1 (left) to 1 (right)
    pub move_x: f32,
    /// Forward axis, -1 (back) to 1 (forward)
    pub move_y: f32,
    /// Yaw delta in degrees
    pub look_yaw: f32,
    /// Pitch delta in degrees
    pub look_pitch: f32,
    pub held: HeldButtons,
    pub pressed: PressedButtons,
    /// Selected loadout slot
    pub weapon: u8,
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl Command {
    /// No movement, no buttons, keep the given weapon selected
    pub fn neutral(weapon: u8) -> Self {
        Self {
            weapon,
            ..Self::default()
        }
    }

    /// Clamp axes into range and zero out non-finite values
    pub fn sanitized(mut self) -> Self {
        self.move_x = finite_or_zero(self.move_x).clamp(-1.0, 1.0);
        self.move_y = finite_or_zero(self.move_y).clamp(-1.0, 1.0);
        self.look_yaw = finite_or_zero(self.look_yaw);
        self.look_pitch = finite_or_zero(self.look_pitch);
        self
    }

    /// The command re-used when the next one is missing: held state carries
    /// over, one-shot presses and look deltas do not.
    pub fn repeated(&self) -> Self {
        Self {
            look_yaw: 0.0,
            look_pitch: 0.0,
            pressed: PressedButtons::empty(),
            ..*self
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_f32_le(self.move_x);
        buf.put_f32_le(self.move_y);
        buf.put_f32_le(self.look_yaw);
        buf.put_f32_le(self.look_pitch);
        buf.put_u8(self.held.bits());
        buf.put_u8(self.pressed.bits());
        buf.put_u8(self.weapon);
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, CodecError> {
        if buf.remaining() != COMMAND_WIRE_SIZE {
            return Err(CodecError::WrongLength {
                expected: COMMAND_WIRE_SIZE,
                actual: buf.remaining(),
            });
        }
        Ok(Self {
            move_x: buf.get_f32_le(),
            move_y: buf.get_f32_le(),
            look_yaw: buf.get_f32_le(),
            look_pitch: buf.get_f32_le(),
            held: HeldButtons::from_bits_retain(buf.get_u8()),
            pressed: PressedButtons::from_bits_retain(buf.get_u8()),
            weapon: buf.get_u8(),
        }
        .sanitized())
    }
}

/// A command tagged with the tick it was sampled for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickedCommand {
    pub tick: Tick,
    pub command: Command,
}

impl TickedCommand {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TICKED_COMMAND_WIRE_SIZE);
        buf.put_u64_le(self.tick);
        self.command.encode(&mut buf);
        buf.freeze()
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != TICKED_COMMAND_WIRE_SIZE {
            return Err(CodecError::WrongLength {
                expected: TICKED_COMMAND_WIRE_SIZE,
                actual: bytes.len(),
            });
        }
        let tick = bytes.get_u64_le();
        let command = Command::decode(bytes)?;
        Ok(Self { tick, command })
    }
}

/// Wire decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("frame is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}

/// What to use when a tick's command never arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingCommandPolicy {
    #[default]
    RepeatLast,
    Neutral,
}

/// Result of consuming one tick from a [`CommandBuffer`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakenCommand {
    pub command: Command,
    /// The command was synthesized by the missing-command policy
    pub missing: bool,
}

/// Server-side queue of one entity's commands, consumed in tick order
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    pending: BTreeMap<Tick, Command>,
    last_consumed: Option<Tick>,
    last_command: Command,
    policy: MissingCommandPolicy,
    capacity: usize,
}

impl CommandBuffer {
    pub fn new(policy: MissingCommandPolicy, capacity: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            last_consumed: None,
            last_command: Command::default(),
            policy,
            capacity: capacity.max(1),
        }
    }

    /// Queue a command. The first command for a tick wins; commands for
    /// already-consumed ticks are rejected.
    pub fn insert(&mut self, tick: Tick, command: Command) -> Result<(), SimError> {
        if let Some(last) = self.last_consumed {
            if tick <= last {
                return Err(SimError::OutOfOrderCommand { tick, last });
            }
        }
        if self.pending.contains_key(&tick) {
            return Err(SimError::DuplicateCommand { tick });
        }
        if self.pending.len() >= self.capacity {
            // Keep the earliest ticks; the newest arrival is the one dropped
            return Err(SimError::CommandOverflow { tick });
        }
        self.pending.insert(tick, command.sanitized());
        Ok(())
    }

    /// Consume the command for `tick`, resolving a gap with the policy
    pub fn take(&mut self, tick: Tick) -> TakenCommand {
        // Anything older than `tick` missed its slot
        self.pending = self.pending.split_off(&tick);

        let taken = match self.pending.remove(&tick) {
            Some(command) => TakenCommand {
                command,
                missing: false,
            },
            None => TakenCommand {
                command: match self.policy {
                    MissingCommandPolicy::RepeatLast => self.last_command.repeated(),
                    MissingCommandPolicy::Neutral => Command::neutral(self.last_command.weapon),
                },
                missing: true,
            },
        };

        self.last_consumed = Some(tick);
        self.last_command = taken.command;
        taken
    }

    pub fn last_consumed(&self) -> Option<Tick> {
        self.last_consumed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Raw device state observed during one render frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawInput {
    pub move_x: f32,
    pub move_y: f32,
    /// Mouse/stick delta this frame, already in degrees
    pub look_dx: f32,
    pub look_dy: f32,
    pub sprint: bool,
    pub aim: bool,
    pub fire: bool,
    pub melee: bool,
    pub grenade: bool,
    pub inspect: bool,
    pub reload: bool,
    /// Went down this frame
    pub jump: bool,
    /// Went down this frame
    pub holster: bool,
    /// Slot chosen this frame, if any
    pub select_weapon: Option<u8>,
}

/// Turns per-frame device input into exactly one [`Command`] per tick.
///
/// Look deltas accumulate across frames and one-shot presses latch until the
/// next sample, so a frame rate above the tick rate loses nothing.
#[derive(Debug, Clone)]
pub struct InputSampler {
    sensitivity: f32,
    invert_pitch: bool,
    yaw_accum: f32,
    pitch_accum: f32,
    latest: RawInput,
    pressed: PressedButtons,
    weapon: u8,
}

impl InputSampler {
    pub fn new(sensitivity: f32, invert_pitch: bool) -> Self {
        Self {
            sensitivity,
            invert_pitch,
            yaw_accum: 0.0,
            pitch_accum: 0.0,
            latest: RawInput::default(),
            pressed: PressedButtons::empty(),
            weapon: 0,
        }
    }

    /// Record one render frame of device input
    pub fn capture(&mut self, frame: &RawInput) {
        self.yaw_accum += finite_or_zero(frame.look_dx) * self.sensitivity;
        let dy = finite_or_zero(frame.look_dy) * self.sensitivity;
        self.pitch_accum += if self.invert_pitch { -dy } else { dy };

        if frame.jump {
            self.pressed.set(PressedButtons::JUMP, true);
        }
        if frame.holster {
            self.pressed.set(PressedButtons::HOLSTER, true);
        }
        if let Some(slot) = frame.select_weapon {
            self.weapon = slot;
        }
        self.latest = *frame;
    }

    /// Package everything captured since the last call into a command
    pub fn sample(&mut self) -> Command {
        let frame = self.latest;
        let mut held = HeldButtons::empty();
        held.set(HeldButtons::SPRINT, frame.sprint);
        held.set(HeldButtons::AIM, frame.aim);
        held.set(HeldButtons::MELEE, frame.melee);
        held.set(HeldButtons::GRENADE, frame.grenade);
        held.set(HeldButtons::INSPECT, frame.inspect);
        held.set(HeldButtons::RELOAD, frame.reload);
        held.set(HeldButtons::FIRE, frame.fire);

        let command = Command {
            move_x: frame.move_x,
            move_y: frame.move_y,
            look_yaw: self.yaw_accum,
            look_pitch: self.pitch_accum,
            held,
            pressed: self.pressed,
            weapon: self.weapon,
        }
        .sanitized();

        self.yaw_accum = 0.0;
        self.pitch_accum = 0.0;
        self.pressed = PressedButtons::empty();
        command
    }
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new(1.0, false)
    }
}
