//! A simulated AM43 motor.

use am43_protocol::{
    battery_reply, light_reply, position_reply, status_reply, BatteryLevel, Frame, LightLevel,
    Percentage, Pin, PositionFlags, PositionReport, CMD_GET_BATTERY, CMD_GET_LIGHT,
    CMD_GET_POSITION, CMD_LOGIN, CMD_MOVE, CMD_MOVE_TO, CMD_SET_LIGHT_THRESHOLD, MOVE_CLOSE,
    MOVE_OPEN, MOVE_STOP,
};
use tracing::trace;

/// Motor state. Moves complete instantly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimMotor {
    position: Percentage,
    limits_set: bool,
    battery: BatteryLevel,
    light: LightLevel,
    light_threshold: LightLevel,
    speed: u8,
    reversed: bool,
    has_light_sensor: bool,
    pin: Option<Pin>,
    logged_in: bool,
}

impl Default for SimMotor {
    fn default() -> Self {
        SimMotor {
            position: Percentage::OPEN,
            limits_set: true,
            battery: BatteryLevel::from_raw(80),
            light: LightLevel::from_raw(3),
            light_threshold: LightLevel::from_raw(5),
            speed: 30,
            reversed: false,
            has_light_sensor: true,
            pin: None,
            logged_in: false,
        }
    }
}

/// What a motor sends back for one command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotorOutput {
    /// The reply frame.
    pub reply: Frame,
    /// Whether the command changed the position.
    pub moved: bool,
}

impl SimMotor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, position: Percentage) -> Self {
        self.position = position;
        self
    }

    pub fn with_battery(mut self, battery: BatteryLevel) -> Self {
        self.battery = battery;
        self
    }

    pub fn with_light(mut self, light: LightLevel) -> Self {
        self.light = light;
        self
    }

    /// Require a login with `pin` before moves and settings are accepted.
    pub fn with_pin(mut self, pin: Pin) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Travel limits not set: the position reads as unknown and moves fail.
    pub fn without_limits(mut self) -> Self {
        self.limits_set = false;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn position(&self) -> Option<Percentage> {
        self.limits_set.then_some(self.position)
    }

    pub fn battery(&self) -> BatteryLevel {
        self.battery
    }

    pub fn set_battery(&mut self, battery: BatteryLevel) {
        self.battery = battery;
    }

    pub fn light(&self) -> LightLevel {
        self.light
    }

    pub fn set_light(&mut self, light: LightLevel) {
        self.light = light;
    }

    pub fn light_threshold(&self) -> LightLevel {
        self.light_threshold
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// The position reply as the motor would report it now.
    pub fn report(&self) -> PositionReport {
        PositionReport {
            flags: PositionFlags {
                reversed: self.reversed,
                top_limit_set: self.limits_set,
                bottom_limit_set: self.limits_set,
                has_light_sensor: self.has_light_sensor,
            },
            speed: self.speed,
            position: self.position(),
        }
    }

    /// The BLE connection dropped.
    pub fn on_disconnect(&mut self) {
        self.logged_in = false;
    }

    /// Execute one command frame.
    pub fn handle(&mut self, frame: &Frame) -> MotorOutput {
        let code = frame.code();
        let payload = frame.payload();
        trace!(code, ?payload, "motor command");

        let locked = self.pin.is_some() && !self.logged_in;
        let before = self.position;
        let reply = match code {
            CMD_GET_BATTERY => battery_reply(self.battery),
            CMD_GET_POSITION => position_reply(&self.report()),
            CMD_GET_LIGHT => light_reply(self.light),
            CMD_LOGIN => status_reply(code, self.login(payload)),
            _ if locked => status_reply(code, false),
            CMD_MOVE_TO => status_reply(code, self.move_to(payload)),
            CMD_MOVE => status_reply(code, self.move_direction(payload)),
            CMD_SET_LIGHT_THRESHOLD => {
                let accepted = match payload {
                    [level] => match LightLevel::new(*level) {
                        Ok(level) => {
                            self.light_threshold = level;
                            true
                        }
                        Err(_) => false,
                    },
                    _ => false,
                };
                status_reply(code, accepted)
            }
            _ => status_reply(code, false),
        };

        MotorOutput {
            reply,
            moved: self.position != before,
        }
    }

    fn login(&mut self, payload: &[u8]) -> bool {
        let [hi, lo] = payload else {
            return false;
        };
        let given = u16::from_be_bytes([*hi, *lo]);
        let accepted = self.pin.map_or(true, |pin| pin.value() == given);
        self.logged_in = accepted;
        accepted
    }

    fn move_to(&mut self, payload: &[u8]) -> bool {
        let [target] = payload else {
            return false;
        };
        match Percentage::new(*target) {
            Ok(target) if self.limits_set => {
                self.position = target;
                true
            }
            _ => false,
        }
    }

    fn move_direction(&mut self, payload: &[u8]) -> bool {
        if !self.limits_set {
            return false;
        }
        match payload {
            [MOVE_OPEN] => self.position = Percentage::OPEN,
            [MOVE_CLOSE] => self.position = Percentage::CLOSED,
            [MOVE_STOP] => {}
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am43_protocol::{interpret, Command, Response};

    fn run(motor: &mut SimMotor, command: Command) -> Result<Response, am43_protocol::ProtocolError> {
        let output = motor.handle(&command.encode());
        interpret(&output.reply, &command)
    }

    #[test]
    fn test_move_and_query() {
        let mut motor = SimMotor::new();
        let target = Percentage::new(50).unwrap();
        assert_eq!(run(&mut motor, Command::MoveTo(target)), Ok(Response::Ack));
        assert_eq!(motor.position(), Some(target));

        match run(&mut motor, Command::GetPosition).unwrap() {
            Response::Position(report) => {
                assert_eq!(report.position, Some(target));
                assert!(report.flags.top_limit_set);
                assert_eq!(report.speed, 30);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(run(&mut motor, Command::Close), Ok(Response::Ack));
        assert_eq!(motor.position(), Some(Percentage::CLOSED));
        let output = motor.handle(&Command::Stop.encode());
        assert!(!output.moved);
    }

    #[test]
    fn test_queries() {
        let mut motor = SimMotor::new()
            .with_battery(BatteryLevel::from_raw(64))
            .with_light(LightLevel::from_raw(7));
        assert_eq!(
            run(&mut motor, Command::GetBattery),
            Ok(Response::Battery(BatteryLevel::from_raw(64)))
        );
        assert_eq!(
            run(&mut motor, Command::GetLight),
            Ok(Response::Light(LightLevel::from_raw(7)))
        );
    }

    #[test]
    fn test_no_limits() {
        let mut motor = SimMotor::new().without_limits();
        assert!(run(&mut motor, Command::Open).is_err());
        match run(&mut motor, Command::GetPosition).unwrap() {
            Response::Position(report) => assert_eq!(report.position, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pin_gates_moves() {
        let pin = Pin::new(1234).unwrap();
        let mut motor = SimMotor::new().with_pin(pin);
        let target = Percentage::new(20).unwrap();

        assert!(run(&mut motor, Command::MoveTo(target)).is_err());
        assert!(run(&mut motor, Command::GetBattery).is_ok());
        assert!(run(&mut motor, Command::Login(Pin::new(1111).unwrap())).is_err());
        assert_eq!(run(&mut motor, Command::Login(pin)), Ok(Response::Ack));
        assert_eq!(run(&mut motor, Command::MoveTo(target)), Ok(Response::Ack));

        motor.on_disconnect();
        assert!(!motor.is_logged_in());
        assert!(run(&mut motor, Command::Stop).is_err());
    }

    #[test]
    fn test_light_threshold() {
        let mut motor = SimMotor::new();
        let level = LightLevel::new(8).unwrap();
        assert_eq!(
            run(&mut motor, Command::SetLightThreshold(level)),
            Ok(Response::Ack)
        );
        assert_eq!(motor.light_threshold(), level);
    }
}
