use crate::chain::RegisterChain;
use crate::protocol::{self, RegisterStep};
use crate::task_queue::{TaskCallback, TaskQueue};
use crate::transport::ControlTransport;
use crate::types::{CameraSettings, FlipFlags};
use std::sync::Arc;

/// PS3Eye camera settings controller.
///
/// Each setter updates the cached value immediately and queues the register
/// chain that makes the camera converge to it.
pub struct Ps3EyeCamera<T: ControlTransport + ?Sized> {
    queue: TaskQueue<T>,
    settings: CameraSettings,
    frame_width: u32,
}

impl<T: ControlTransport + ?Sized> Ps3EyeCamera<T> {
    /// Controller for a camera streaming `frame_width` pixel wide frames.
    /// Nothing is sent to the device until a setter is called.
    pub fn new(transport: Arc<T>, frame_width: u32) -> Self {
        Self::with_queue(TaskQueue::new(transport), frame_width)
    }

    pub fn with_queue(queue: TaskQueue<T>, frame_width: u32) -> Self {
        Self {
            queue,
            settings: CameraSettings::default(),
            frame_width,
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn queue(&self) -> &TaskQueue<T> {
        &self.queue
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    /// Push every cached setting to the camera.
    pub fn apply_settings(&mut self) {
        let s = self.settings;
        self.set_auto_white_balance(s.auto_white_balance);
        self.set_autogain(s.autogain);
        self.set_sharpness(s.sharpness);
        self.set_contrast(s.contrast);
        self.set_brightness(s.brightness);
        self.set_hue(s.hue);
        self.set_red_balance(s.red_balance);
        self.set_green_balance(s.green_balance);
        self.set_blue_balance(s.blue_balance);
        self.set_flip(s.flip);
    }

    /// Turning autogain off restores the cached gain and exposure.
    pub fn set_autogain(&mut self, enabled: bool) {
        self.settings.autogain = enabled;
        self.submit(
            "set_autogain",
            protocol::autogain_steps(enabled, self.settings.gain, self.settings.exposure),
        );
    }

    pub fn set_auto_white_balance(&mut self, enabled: bool) {
        self.settings.auto_white_balance = enabled;
        self.submit("set_auto_white_balance", protocol::auto_white_balance_steps(enabled));
    }

    pub fn set_gain(&mut self, gain: u8) {
        self.settings.gain = gain;
        self.submit("set_gain", protocol::gain_steps(gain));
    }

    pub fn set_exposure(&mut self, exposure: u8) {
        self.settings.exposure = exposure;
        self.submit("set_exposure", protocol::exposure_steps(exposure));
    }

    pub fn set_sharpness(&mut self, sharpness: u8) {
        self.settings.sharpness = sharpness;
        self.submit("set_sharpness", protocol::sharpness_steps(sharpness));
    }

    pub fn set_contrast(&mut self, contrast: u8) {
        self.settings.contrast = contrast;
        self.submit(
            "set_contrast",
            protocol::sensor_value_steps(protocol::SENSOR_REG_CONTRAST, contrast),
        );
    }

    pub fn set_brightness(&mut self, brightness: u8) {
        self.settings.brightness = brightness;
        self.submit(
            "set_brightness",
            protocol::sensor_value_steps(protocol::SENSOR_REG_BRIGHTNESS, brightness),
        );
    }

    pub fn set_hue(&mut self, hue: u8) {
        self.settings.hue = hue;
        self.submit("set_hue", protocol::sensor_value_steps(protocol::SENSOR_REG_HUE, hue));
    }

    pub fn set_red_balance(&mut self, value: u8) {
        self.settings.red_balance = value;
        self.submit(
            "set_red_balance",
            protocol::sensor_value_steps(protocol::SENSOR_REG_RED_BALANCE, value),
        );
    }

    pub fn set_green_balance(&mut self, value: u8) {
        self.settings.green_balance = value;
        self.submit(
            "set_green_balance",
            protocol::sensor_value_steps(protocol::SENSOR_REG_GREEN_BALANCE, value),
        );
    }

    pub fn set_blue_balance(&mut self, value: u8) {
        self.settings.blue_balance = value;
        self.submit(
            "set_blue_balance",
            protocol::sensor_value_steps(protocol::SENSOR_REG_BLUE_BALANCE, value),
        );
    }

    pub fn set_flip(&mut self, flip: FlipFlags) {
        self.settings.flip = flip;
        self.submit(
            "set_flip",
            protocol::flip_steps(
                flip.contains(FlipFlags::HORIZONTAL),
                flip.contains(FlipFlags::VERTICAL),
            ),
        );
    }

    /// Select the closest supported rate not above `fps` for the current
    /// frame width. Returns the rate actually programmed.
    pub fn set_frame_rate(&mut self, fps: u8) -> u8 {
        let rate = protocol::select_frame_rate(self.frame_width, fps);
        self.settings.frame_rate = rate.fps;
        self.submit("set_frame_rate", protocol::frame_rate_steps(&rate));
        rate.fps
    }

    pub fn set_led(&mut self, on: bool) {
        self.settings.led = on;
        self.submit("set_led", protocol::led_steps(on));
    }

    /// Write a table of sensor registers in order.
    pub fn write_sensor_registers(&self, sequence: &[(u8, u8)], on_done: Option<TaskCallback>) {
        let chain = RegisterChain::new(protocol::sccb_write_sequence(sequence));
        match on_done {
            Some(on_done) => self.queue.enqueue_with("write_sensor_registers", chain, on_done),
            None => self.queue.enqueue("write_sensor_registers", chain),
        }
    }

    /// Write a table of bridge registers in order.
    pub fn write_bridge_registers(&self, sequence: &[(u16, u8)], on_done: Option<TaskCallback>) {
        let chain = RegisterChain::new(protocol::ov534_write_sequence(sequence));
        match on_done {
            Some(on_done) => self.queue.enqueue_with("write_bridge_registers", chain, on_done),
            None => self.queue.enqueue("write_bridge_registers", chain),
        }
    }

    fn submit(&self, name: &'static str, steps: Vec<RegisterStep>) {
        self.queue.enqueue(name, RegisterChain::new(steps));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        OV534_REG_FRAME_RATE, OV534_REG_LED_DIRECTION, OV534_REG_LED_OUTPUT, OV534_REG_READ,
        OV534_REG_SUBADDR, OV534_REG_WRITE,
    };
    use crate::chain::ChainOutcome;
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::ControlRequest;
    use std::sync::Mutex;

    /// Sub-address/value pairs of every SCCB write in the transfer log.
    fn sensor_writes(transport: &ScriptedTransport) -> Vec<(u8, u8)> {
        let log = transport.log();
        log.windows(2)
            .filter_map(|w| match (w[0], w[1]) {
                (a, b)
                    if a == ControlRequest::write(OV534_REG_SUBADDR, a.value)
                        && b == ControlRequest::write(OV534_REG_WRITE, b.value) =>
                {
                    Some((a.value, b.value))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_default_settings() {
        let camera = Ps3EyeCamera::new(ScriptedTransport::new(), 640);
        let s = camera.settings();
        assert_eq!((s.gain, s.exposure, s.hue, s.contrast), (20, 120, 143, 37));
        assert!(!s.autogain);
    }

    #[test]
    fn test_setters_cache_and_write() {
        let transport = ScriptedTransport::new();
        let mut camera = Ps3EyeCamera::new(transport.clone(), 640);

        camera.set_gain(0x25);
        camera.set_brightness(99);
        camera.set_red_balance(200);

        assert_eq!(camera.settings().gain, 0x25);
        assert_eq!(camera.settings().brightness, 99);
        assert_eq!(
            sensor_writes(&transport),
            vec![(0x00, 0x75), (0x9b, 99), (0x43, 200)]
        );
    }

    #[test]
    fn test_autogain_off_restores_manual_values() {
        let transport = ScriptedTransport::new();
        transport.set_register(OV534_REG_READ, 0xff);
        let mut camera = Ps3EyeCamera::new(transport.clone(), 640);
        camera.set_exposure(200);

        camera.set_autogain(false);
        let writes = sensor_writes(&transport);
        assert_eq!(
            &writes[2..],
            &[(0x13, 0xf0), (0x64, 0xfc), (0x00, 0x34), (0x08, 1), (0x10, 144)]
        );
    }

    #[test]
    fn test_flip_read_modify_write() {
        let transport = ScriptedTransport::new();
        transport.set_register(OV534_REG_READ, 0x01);
        let mut camera = Ps3EyeCamera::new(transport.clone(), 640);

        camera.set_flip(FlipFlags::VERTICAL);
        assert_eq!(sensor_writes(&transport), vec![(0x0c, 0x41)]);
        assert_eq!(camera.settings().flip, FlipFlags::VERTICAL);
    }

    #[test]
    fn test_frame_rate_returns_chosen_rate() {
        let transport = ScriptedTransport::new();
        let mut camera = Ps3EyeCamera::new(transport.clone(), 320);

        assert_eq!(camera.set_frame_rate(90), 75);
        assert_eq!(camera.settings().frame_rate, 75);
        assert_eq!(sensor_writes(&transport), vec![(0x11, 0x03), (0x0d, 0xc1)]);
        assert_eq!(transport.register(OV534_REG_FRAME_RATE), Some(0x04));
    }

    #[test]
    fn test_led_toggles_bridge_bits() {
        let transport = ScriptedTransport::new();
        transport.set_register(OV534_REG_LED_DIRECTION, 0x01);
        transport.set_register(OV534_REG_LED_OUTPUT, 0x02);
        let mut camera = Ps3EyeCamera::new(transport.clone(), 640);

        camera.set_led(true);
        assert_eq!(transport.register(OV534_REG_LED_DIRECTION), Some(0x81));
        assert_eq!(transport.register(OV534_REG_LED_OUTPUT), Some(0x82));

        camera.set_led(false);
        assert_eq!(transport.register(OV534_REG_LED_DIRECTION), Some(0x01));
        assert_eq!(transport.register(OV534_REG_LED_OUTPUT), Some(0x02));
    }

    #[test]
    fn test_sensor_sequence_reports_completion() {
        let transport = ScriptedTransport::new();
        let camera = Ps3EyeCamera::new(transport.clone(), 640);
        let done = Arc::new(Mutex::new(None));
        let sink = done.clone();

        camera.write_sensor_registers(
            &[(0x12, 0x80), (0x11, 0x01)],
            Some(Box::new(move |outcome: &ChainOutcome| *sink.lock().unwrap() = Some(outcome.is_ok()))),
        );
        assert_eq!(*done.lock().unwrap(), Some(true));
        assert_eq!(sensor_writes(&transport), vec![(0x12, 0x80), (0x11, 0x01)]);
    }

    #[test]
    fn test_apply_settings_queues_every_setting() {
        let transport = ScriptedTransport::new();
        let mut camera = Ps3EyeCamera::new(transport.clone(), 640);
        camera.apply_settings();

        let writes = sensor_writes(&transport);
        assert!(writes.contains(&(0x63, 0xaa)));
        assert!(writes.contains(&(0x01, 143)));
        assert!(writes.contains(&(0x42, 128)));
        assert!(!camera.queue().is_busy());
    }
}
