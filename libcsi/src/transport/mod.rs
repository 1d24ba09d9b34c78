//! QUIC transport layer for CSI messages.
//!
//! This module provides [`CsiClient`] and [`CsiServer`] that communicate
//! [`CsiMessage`] values over QUIC bi-directional streams using `quinn`.
//!
//! [`CsiClient`]: client::CsiClient
//! [`CsiServer`]: server::CsiServer
//! [`CsiMessage`]: crate::message::CsiMessage

pub mod client;
pub mod server;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

    use super::client::CsiClient;
    use super::server::CsiServer;
    use crate::backend::zfs::fake::FakeZfs;
    use crate::backend::zfs::{ZfsBackend, ZfsBackendConfig};
    use crate::error::CsiError;
    use crate::message::CsiMessage;
    use crate::types::*;

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    fn tls_pair() -> (rustls::ServerConfig, rustls::ClientConfig) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
            .expect("generate certificate");
        let cert_der = CertificateDer::from(certified.cert.der().to_vec());
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

        let server = rustls::ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .expect("server protocol versions")
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], key_der)
            .expect("server certificate");

        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert_der).expect("add root");
        let client = rustls::ClientConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .expect("client protocol versions")
            .with_root_certificates(roots)
            .with_no_client_auth();

        (server, client)
    }

    #[tokio::test]
    async fn request_response_over_loopback() {
        let fake = Arc::new(FakeZfs::with_datasets(&["tank", "tank/k8s"]));
        let backend = Arc::new(ZfsBackend::new(
            ZfsBackendConfig::new("tank/k8s", "controller-0", "storage"),
            fake,
        ));
        let (server_tls, client_tls) = tls_pair();
        let bind = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let server = Arc::new(CsiServer::new(bind, server_tls, backend).expect("server"));
        let addr = server.endpoint().local_addr().expect("local addr");
        let serving = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve().await })
        };

        let client = CsiClient::connect(addr, "localhost", client_tls)
            .await
            .expect("connect");

        let probe = client.call(&CsiMessage::Probe).await.expect("probe");
        assert!(matches!(probe, CsiMessage::ProbeResult(true)));

        let created = client
            .call(&CsiMessage::CreateVolume(CreateVolumeRequest {
                name: "pvc-1".into(),
                capacity_range: Some(CapacityRange::required(1 << 30)),
                parameters: HashMap::from([
                    ("csi.storage.k8s.io/pvc/namespace".to_owned(), "default".to_owned()),
                    ("csi.storage.k8s.io/pvc/name".to_owned(), "data".to_owned()),
                    ("csi.storage.k8s.io/pv/name".to_owned(), "pvc-1".to_owned()),
                ]),
                ..Default::default()
            }))
            .await
            .expect("create");
        assert!(matches!(created, CsiMessage::VolumeCreated(v) if v.capacity_bytes == 1 << 30));

        let listed = client
            .call(&CsiMessage::ListVolumes(ListVolumesRequest::default()))
            .await
            .expect("list");
        match listed {
            CsiMessage::VolumeList(page) => {
                assert_eq!(page.entries.len(), 1);
                assert_eq!(page.entries[0].volume_id.as_str(), "pvc-1");
            }
            other => panic!("unexpected reply: {other}"),
        }

        let err = client.call(&CsiMessage::GetCapacity).await.unwrap_err();
        assert!(matches!(err, CsiError::Unimplemented(_)));

        let reply = client.request(&CsiMessage::Ok).await.expect("request");
        assert!(matches!(
            reply,
            CsiMessage::Error(CsiError::InvalidArgument(_))
        ));

        client.close();
        server.endpoint().close(quinn::VarInt::from_u32(0), b"test done");
        serving.await.expect("join").expect("serve");
    }
}
