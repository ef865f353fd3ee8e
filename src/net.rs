use core::convert::TryInto;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedded_svc::http::client::Client as HttpClient;
use embedded_svc::http::Method;
use embedded_svc::io::Write as _;
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::modem::Modem;
use esp_idf_hal::sys::EspError;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::http::client::{Configuration as HttpConfiguration, EspHttpConnection};
use esp_idf_svc::io::EspIOError;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use tapgate::directory::{HttpReply, HttpTransport};
use tapgate::error::{DirectoryError, LinkError};
use tapgate::hal::NetworkLink;

const WIFI_SSID: &str = env!("WIFI_SSID");
const WIFI_PASS: &str = env!("WIFI_PASS");

pub type Wifi = BlockingWifi<EspWifi<'static>>;

fn radio_error(err: EspError) -> LinkError {
    LinkError::Radio(err.to_string())
}

/// 启动 Wi-Fi 并尝试连接；连接失败不阻塞启动，交给连通性监控重连。
pub fn start_wifi(modem: Modem) -> Result<Wifi, LinkError> {
    let sys_loop = EspSystemEventLoop::take().map_err(radio_error)?;
    let nvs = EspDefaultNvsPartition::take().ok();
    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), nvs).map_err(radio_error)?,
        sys_loop,
    )
    .map_err(radio_error)?;

    let auth_method = if WIFI_PASS.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let wifi_configuration: Configuration = Configuration::Client(ClientConfiguration {
        ssid: WIFI_SSID
            .try_into()
            .map_err(|_| LinkError::Radio("SSID too long".to_string()))?,
        bssid: None,
        auth_method,
        password: WIFI_PASS
            .try_into()
            .map_err(|_| LinkError::Radio("password too long".to_string()))?,
        channel: None,
        ..Default::default()
    });

    wifi.set_configuration(&wifi_configuration).map_err(radio_error)?;
    wifi.start().map_err(radio_error)?;
    log::info!("Wi-Fi started");
    if let Err(err) = join(&mut wifi) {
        log::warn!("Wi-Fi connect failed: {}", err);
    }
    Ok(wifi)
}

fn join(wifi: &mut Wifi) -> Result<(), LinkError> {
    wifi.connect().map_err(radio_error)?;
    log::info!("Wi-Fi connected to {}", WIFI_SSID);
    wifi.wait_netif_up().map_err(radio_error)?;
    log::info!("Wi-Fi netif up");
    Ok(())
}

/// 平台重连：断开后重新关联。Wi-Fi 句柄跨控制器重启保持。
pub struct WifiLink {
    wifi: Arc<Mutex<Wifi>>,
}

impl WifiLink {
    pub fn new(wifi: Arc<Mutex<Wifi>>) -> Self {
        Self { wifi }
    }
}

impl NetworkLink for WifiLink {
    fn reconnect(&mut self) -> Result<(), LinkError> {
        let mut wifi = self
            .wifi
            .lock()
            .map_err(|_| LinkError::Radio("wifi lock poisoned".to_string()))?;
        if let Err(err) = wifi.disconnect() {
            log::debug!("Wi-Fi disconnect before reconnect failed: {}", err);
        }
        join(&mut wifi)
    }
}

fn transport_error(err: EspIOError) -> DirectoryError {
    DirectoryError::Transport(format!("{:?}", err))
}

/// 基于 `EspHttpConnection` 的传输；每次请求新建连接。
pub struct EspHttpTransport {
    timeout: Duration,
}

impl EspHttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl HttpTransport for EspHttpTransport {
    fn post_json(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpReply, DirectoryError> {
        let config = HttpConfiguration {
            timeout: Some(self.timeout),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&config)
            .map_err(|err| transport_error(EspIOError::from(err)))?;
        let mut client = HttpClient::wrap(connection);
        let mut request = client
            .request(Method::Post, url, headers)
            .map_err(transport_error)?;
        request.write_all(body).map_err(transport_error)?;
        request.flush().map_err(transport_error)?;
        let mut response = request.submit().map_err(transport_error)?;
        let status = response.status();
        log::debug!("Directory response status {}", status);

        let mut reply = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let len = response.read(&mut buf).map_err(transport_error)?;
            if len == 0 {
                break;
            }
            reply.extend_from_slice(&buf[..len]);
        }
        Ok(HttpReply {
            status,
            body: reply,
        })
    }
}
