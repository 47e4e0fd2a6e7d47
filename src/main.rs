//! SmartMeter Firmware: Main Entry Point
//!
//! Boots the board, builds the [`NodeContext`] and hands it to three units.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  I2cDriver → SharedBus   EspMqttTransport   LogEventSink       │
//! │  (INA219 + INA3221)      (Transport)        (EventSink)        │
//! │  MonotonicClock          SystemWallClock    StatusLed (LEDC)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌──────────────┐  ┌───────────────┐  ┌──────────────────┐     │
//! │  │ PublishUnit  │  │ LivenessUnit  │  │ ReactorUnit      │     │
//! │  │ core 1, 5 s  │  │ core 0, 100ms │  │ core 1, inbox    │     │
//! │  └──────┬───────┘  └───────┬───────┘  └────────▲─────────┘     │
//! │         └─── Arc<Link> ────┘     MQTT pump ────┘               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::PinDriver;
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::EspSntp;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{info, warn};

use smartmeter::adapters::log_sink::LogEventSink;
use smartmeter::adapters::mqtt::EspMqttTransport;
use smartmeter::adapters::time::{MonotonicClock, SystemWallClock};
use smartmeter::app::commands::Inbox;
use smartmeter::app::ports::Clock;
use smartmeter::app::reactor::Reactor;
use smartmeter::config::NodeConfig;
use smartmeter::drivers::status_led::StatusLed;
use smartmeter::drivers::task_pin::{spawn_on_core, Core};
use smartmeter::pins;
use smartmeter::runtime::{
    drive, liveness_scheduler, publish_scheduler, LivenessUnit, NodeContext, PublishUnit,
    ReactorUnit,
};

const WIFI_SSID: &str = match option_env!("SMARTMETER_WIFI_SSID") {
    Some(s) => s,
    None => "",
};
const WIFI_PASS: &str = match option_env!("SMARTMETER_WIFI_PASS") {
    Some(s) => s,
    None => "",
};
const MQTT_USERNAME: Option<&str> = option_env!("SMARTMETER_MQTT_USERNAME");
const MQTT_PASSWORD: Option<&str> = option_env!("SMARTMETER_MQTT_PASSWORD");
/// Optional JSON override of [`NodeConfig::default`], baked in at build time.
const NODE_CONFIG_JSON: Option<&str> = option_env!("SMARTMETER_CONFIG_JSON");

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  SmartMeter v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let config = match NODE_CONFIG_JSON {
        Some(json) => NodeConfig::from_json(json.as_bytes())
            .map_err(|e| anyhow!("baked-in config rejected: {}", e))?,
        None => NodeConfig::default(),
    };

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // ── 3. Network + time ─────────────────────────────────────
    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?,
        sysloop,
    )?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: WIFI_SSID.try_into().map_err(|_| anyhow!("SSID too long"))?,
        password: WIFI_PASS.try_into().map_err(|_| anyhow!("WiFi password too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.connect().context("WiFi association")?;
    wifi.wait_netif_up()?;
    info!("WiFi up: {:?}", wifi.wifi().sta_netif().get_ip_info()?.ip);

    // Keeps the system clock synced; the publish unit skips until it is.
    let _sntp = EspSntp::new_default()?;

    // ── 4. Bus + node context ─────────────────────────────────
    info!(
        "I2C: SDA={} SCL={} @ {} Hz",
        pins::I2C_SDA_GPIO,
        pins::I2C_SCL_GPIO,
        config.i2c_frequency_hz
    );
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &I2cConfig::new().baudrate(Hertz(config.i2c_frequency_hz)),
    )?;

    let inbox: Arc<Inbox> = Arc::new(Inbox::new());
    let transport = EspMqttTransport::new(
        config.prediction_topic.clone(),
        Arc::clone(&inbox),
        MQTT_USERNAME,
        MQTT_PASSWORD,
    );
    let ctx = NodeContext::bring_up(config, i2c, transport, inbox)
        .map_err(|e| anyhow!("node bring-up failed: {}", e))?;

    ctx.link.on_disconnect(|event| {
        warn!(
            "Broker session lost at {} ms (#{}, auto_reconnect={})",
            event.at_ms, event.sequence, event.auto_reconnect
        );
    });

    // ── 5. Outputs ────────────────────────────────────────────
    let alert_pin = PinDriver::output(peripherals.pins.gpio2)?;
    let reactor = Reactor::new(alert_pin, FreeRtos, &ctx.config);

    let ledc_timer = LedcTimerDriver::new(
        peripherals.ledc.timer0,
        &TimerConfig::default().frequency(Hertz(5_000)),
    )?;
    let status_led = StatusLed::new(
        LedcDriver::new(peripherals.ledc.channel0, &ledc_timer, peripherals.pins.gpio13)?,
        LedcDriver::new(peripherals.ledc.channel1, &ledc_timer, peripherals.pins.gpio12)?,
        LedcDriver::new(peripherals.ledc.channel2, &ledc_timer, peripherals.pins.gpio14)?,
    );

    // ── 6. Units ──────────────────────────────────────────────
    let NodeContext {
        config,
        bus: _bus,
        sampler,
        link,
        inbox,
        metrics,
    } = ctx;

    let mut publish = PublishUnit::new(
        &config,
        sampler,
        Arc::clone(&link),
        SystemWallClock::new(config.utc_offset_minutes).map_err(|e| anyhow!("{}", e))?,
        LogEventSink::new(),
        Arc::clone(&metrics),
    );
    let mut liveness = LivenessUnit::new(&config, Arc::clone(&link), Arc::clone(&metrics), status_led);
    let reactor_unit = ReactorUnit::new(reactor, inbox, LogEventSink::new(), metrics);

    let clock = MonotonicClock::new();
    let now = clock.now_ms();
    let mut publish_sched = publish_scheduler(&config, now);
    let mut liveness_sched = liveness_scheduler(&config, now);

    let handles = [
        spawn_on_core(Core::Pro, 5, 8, "liveness\0", move || {
            let clock = MonotonicClock::new();
            drive(&clock, &mut liveness_sched, &mut liveness);
        })?,
        spawn_on_core(Core::App, 4, 12, "publish\0", move || {
            let clock = MonotonicClock::new();
            drive(&clock, &mut publish_sched, &mut publish);
        })?,
        spawn_on_core(Core::App, 6, 6, "reactor\0", move || {
            reactor_unit.run();
        })?,
    ];

    info!("System ready: {} unit(s) running", handles.len());
    for handle in handles {
        if handle.join().is_err() {
            warn!("A unit panicked");
        }
    }
    Ok(())
}
