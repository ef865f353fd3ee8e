// 模块划分：ESP32 外设驱动（GPIO、串口、灯带、Wi-Fi/HTTP）与主机台架
#[cfg(target_os = "espidf")]
mod gpio;
#[cfg(target_os = "espidf")]
mod net;
#[cfg(target_os = "espidf")]
mod smart_led;
#[cfg(target_os = "espidf")]
mod uart_link;

#[cfg(not(target_os = "espidf"))]
mod bench;

#[cfg(target_os = "espidf")]
fn main() {
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, OutputPin};
    use esp_idf_hal::prelude::*;
    use esp_idf_hal::reset::restart;
    use esp_idf_hal::uart;

    use tapgate::actuator::ActuatorController;
    use tapgate::connectivity::TcpProbe;
    use tapgate::controller::{AccessController, ControllerParts, Devices};
    use tapgate::directory::HttpDirectory;
    use tapgate::error::{BootError, HardwareError};
    use tapgate::hal::{Clock, ShutdownSignal, SystemClock};
    use tapgate::main_loop::MainLoop;
    use tapgate::reader::{ChannelCardReader, SharedCardReader};
    use tapgate::serial_io::PanelLink;
    use tapgate::settings::ControllerSettings;
    use tapgate::supervisor::{supervise, SupervisorExit};

    fn build_actuator(
        settings: &ControllerSettings,
        relay_pin: &mut AnyOutputPin,
        buzzer_pin: &mut AnyOutputPin,
        clock: Arc<dyn Clock>,
    ) -> Result<ActuatorController, HardwareError> {
        let relay = gpio::GpioLine::claim("relay", relay_pin)?;
        let buzzer = gpio::GpioLine::claim("buzzer", buzzer_pin)?;
        ActuatorController::new(Box::new(relay), Box::new(buzzer), settings.actuator, clock)
    }

    // ESP-IDF 运行时初始化（链接补丁 & 日志）
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("TapGate controller booting (ESP-IDF)...");

    let settings = ControllerSettings::default();
    if let Err(err) = settings.validate() {
        log::error!("Invalid built-in settings: {}", err);
        restart();
    }
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let shutdown = ShutdownSignal::new();

    let peripherals = Peripherals::take().unwrap();
    let pins = peripherals.pins;

    // 继电器/蜂鸣器先于任何阻塞初始化置为断电电平
    let mut relay_pin = pins.gpio18.downgrade_output();
    let mut buzzer_pin = pins.gpio16.downgrade_output();
    let mut first_actuator =
        match build_actuator(&settings, &mut relay_pin, &mut buzzer_pin, clock.clone()) {
            Ok(actuator) => Some(actuator),
            Err(err) => {
                log::error!("Actuator init failed: {}", err);
                restart();
            }
        };

    // 串口：读卡器上行 + 显示面板下行
    let uart_config = uart::config::Config::new().baudrate(Hertz(115_200));
    let uart = match uart::UartDriver::new(
        peripherals.uart0,
        pins.gpio43,
        pins.gpio44,
        AnyInputPin::none(),
        AnyOutputPin::none(),
        &uart_config,
    ) {
        Ok(uart) => uart,
        Err(err) => {
            log::error!("UART init failed: {:?}", err);
            restart();
        }
    };
    let (uart_tx, uart_rx) = uart.into_split();
    let (event_tx, reader) = ChannelCardReader::channel();
    let (panel_tx, panel_rx) = mpsc::channel();
    let _uart_tasks =
        uart_link::spawn_uart_tasks(uart_rx, uart_tx, clock.clone(), event_tx, panel_rx);
    let reader = SharedCardReader::new(reader);

    // 状态灯任务
    let lamp = smart_led::spawn_lamp_task(peripherals.rmt.channel0, pins.gpio48);

    // Wi-Fi（连接失败交给连通性监控处理）
    let wifi = match net::start_wifi(peripherals.modem) {
        Ok(wifi) => Arc::new(Mutex::new(wifi)),
        Err(err) => {
            log::error!("Wi-Fi start failed: {}", err);
            restart();
        }
    };

    let exit = supervise(&settings.restart, clock.as_ref(), &shutdown, |attempt| {
        let actuator = match first_actuator.take() {
            Some(actuator) => actuator,
            None => build_actuator(&settings, &mut relay_pin, &mut buzzer_pin, clock.clone())?,
        };
        log::info!("{}: hardware stack ready (boot #{})", settings.device_id, attempt);
        let directory_target = settings
            .directory
            .probe_target()
            .ok_or_else(|| BootError::Other("directory base_url has no host".to_string()))?;
        let transport =
            net::EspHttpTransport::new(Duration::from_millis(settings.directory.probe_timeout_ms));
        let devices = Devices {
            actuator,
            surface: Box::new(PanelLink::new(panel_tx.clone())),
            lamp: Some(Box::new(lamp.clone())),
            network_probe: Box::new(TcpProbe::new(settings.network.probe_addr.clone())),
            directory_probe: Box::new(TcpProbe::new(directory_target)),
            link: Box::new(net::WifiLink::new(wifi.clone())),
            directory: Box::new(HttpDirectory::new(transport, &settings.directory)),
            reader: Box::new(reader.clone()),
        };
        let parts = ControllerParts::assemble(&settings, devices, clock.clone(), shutdown.clone());
        Ok(MainLoop::new(AccessController::new(parts), shutdown.clone()))
    });

    match exit {
        SupervisorExit::Shutdown => log::warn!("Controller stopped, restarting chip"),
        SupervisorExit::RestartsExhausted(err) => {
            log::error!("Restarts exhausted ({}), restarting chip", err)
        }
    }
    restart();
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    use std::env;
    use std::path::PathBuf;
    use std::process;
    use std::sync::Arc;
    use std::time::Duration;

    use tapgate::actuator::ActuatorController;
    use tapgate::connectivity::{CommandLink, PathProbe, TcpProbe};
    use tapgate::controller::{AccessController, ControllerParts, Devices};
    use tapgate::directory::{HttpDirectory, TableDirectory};
    use tapgate::error::{BootError, SettingsError};
    use tapgate::hal::{Clock, DirectoryBackend, Probe, ShutdownSignal, SystemClock};
    use tapgate::main_loop::MainLoop;
    use tapgate::reader::SharedCardReader;
    use tapgate::settings::ControllerSettings;
    use tapgate::supervisor::{supervise, SupervisorExit};

    // 服务管理器据此重新拉起进程（EX_TEMPFAIL / EX_CONFIG）
    const EXIT_RESTARTS_EXHAUSTED: i32 = 75;
    const EXIT_BAD_CONFIG: i32 = 78;

    fn load_settings() -> Result<ControllerSettings, SettingsError> {
        let path = env::args()
            .nth(1)
            .or_else(|| env::var("TAPGATE_CONFIG").ok())
            .map(PathBuf::from);
        match path {
            Some(path) => {
                log::info!("Loading settings from {}", path.display());
                ControllerSettings::load(&path)
            }
            None => {
                let settings = ControllerSettings::default();
                settings.validate()?;
                Ok(settings)
            }
        }
    }

    bench::init_logging();
    log::info!("TapGate controller booting (host bench)...");

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(err) => {
            log::error!("Invalid settings: {}", err);
            process::exit(EXIT_BAD_CONFIG);
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let shutdown = ShutdownSignal::new();
    let reader = SharedCardReader::new(bench::spawn_stdin_reader(clock.clone()));

    let exit = supervise(&settings.restart, clock.as_ref(), &shutdown, |attempt| {
        let actuator = ActuatorController::new(
            Box::new(bench::LogLine::new("relay")),
            Box::new(bench::LogLine::new("buzzer")),
            settings.actuator,
            clock.clone(),
        )?;
        log::info!("{}: bench hardware ready (boot #{})", settings.device_id, attempt);

        let (directory_probe, directory): (Box<dyn Probe>, Box<dyn DirectoryBackend>) =
            match settings.directory.table_file.as_deref() {
                Some(table) => (
                    Box::new(PathProbe::new(table)),
                    Box::new(TableDirectory::new(table)),
                ),
                None => {
                    let target = settings.directory.probe_target().ok_or_else(|| {
                        BootError::Other("directory base_url has no host".to_string())
                    })?;
                    let transport = bench::UreqTransport::new(Duration::from_millis(
                        settings.directory.probe_timeout_ms,
                    ));
                    (
                        Box::new(TcpProbe::new(target)),
                        Box::new(HttpDirectory::new(transport, &settings.directory)),
                    )
                }
            };
        let link = CommandLink::from_argv(&settings.network.reconnect_command).ok_or_else(|| {
            BootError::Other("network.reconnect_command is empty".to_string())
        })?;

        let devices = Devices {
            actuator,
            surface: Box::new(bench::LogDisplay),
            lamp: Some(Box::new(bench::LogLamp)),
            network_probe: Box::new(TcpProbe::new(settings.network.probe_addr.clone())),
            directory_probe,
            link: Box::new(link),
            directory,
            reader: Box::new(reader.clone()),
        };
        let parts = ControllerParts::assemble(&settings, devices, clock.clone(), shutdown.clone());
        Ok(MainLoop::new(AccessController::new(parts), shutdown.clone()))
    });

    match exit {
        SupervisorExit::Shutdown => log::info!("Controller stopped"),
        SupervisorExit::RestartsExhausted(err) => {
            log::error!("Restarts exhausted: {}", err);
            process::exit(EXIT_RESTARTS_EXHAUSTED);
        }
    }
}
