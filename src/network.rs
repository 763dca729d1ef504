//! HTTP download of the frame image for Pico W
//! Using reqwless for proper HTTP handling (chunked encoding, etc.)

use defmt::{Debug2Format, error, info, warn};
use embassy_net::dns::DnsSocket;
use embassy_net::tcp::client::{TcpClient, TcpClientState};
use embassy_time::Duration;
use frame_core::headers::Header;
use frame_core::{CycleError, Fetcher};
use reqwless::client::HttpClient;
use reqwless::request::{Method, RequestBuilder};

use crate::task::NET_STACK;

/// Socket inactivity limit; the cycle also bounds the whole download.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetches the raw 4bpp frame over plain HTTP on the shared network stack.
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    async fn fetch<'b>(
        &mut self,
        url: &str,
        headers: &[Header<'_>],
        buf: &'b mut [u8],
    ) -> Result<&'b [u8], CycleError> {
        if !url.starts_with("http://") {
            error!("Unsupported URL scheme: {}", url);
            return Err(CycleError::TransportError("only http:// URLs are supported"));
        }
        let stack = NET_STACK
            .try_get()
            .ok_or(CycleError::TransportError("network stack not up"))?;

        info!("Downloading image from: {}", url);

        let client_state = TcpClientState::<1, 4096, 4096>::new();
        let mut tcp_client = TcpClient::new(*stack, &client_state);
        tcp_client.set_timeout(Some(SOCKET_TIMEOUT));
        let dns_client = DnsSocket::new(*stack);
        let mut http_client = HttpClient::new(&tcp_client, &dns_client);

        let request = http_client.request(Method::GET, url).await.map_err(|err| {
            warn!("HTTP request setup failed: {}", Debug2Format(&err));
            CycleError::TransportError("failed to create HTTP request")
        })?;
        let mut request = request.headers(headers);

        let response = request.send(buf).await.map_err(|err| {
            warn!("HTTP send failed: {}", Debug2Format(&err));
            CycleError::TransportError("failed to send HTTP request")
        })?;

        info!("Response status: {}", response.status.0);
        if response.status.0 != 200 {
            error!("HTTP error: status {}", response.status.0);
            return Err(CycleError::TransportError("server did not return 200"));
        }

        let body = response.body().read_to_end().await.map_err(|err| {
            warn!("HTTP body read failed: {}", Debug2Format(&err));
            CycleError::TransportError("failed to read response body")
        })?;

        info!("Downloaded {} bytes", body.len());
        Ok(body)
    }
}
