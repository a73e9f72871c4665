//! Routing table of the switchboard.
//!
//! ```text
//! Business  ── SEND, CONNECT, ... ──────────────► Network
//! Network   ── RECEIVE, NET_STATUS, ... ────────► Business
//! Business  ── SHOW_CONTENT, ASK_USER_CHOICE ───► Interface
//! Interface ── GUI_READY, SEND_USER_COMMAND ────► Business
//! any       ── GET_SAT_INFO, SET_APP_INFO ──────► envelope target
//! any       ── CLOSE_APP, GET_APP_INFO ─────────► bus
//! ```

use super::envelope::{Channel, Envelope, Kind};

/// Where the switchboard sends an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Deliver to these channels' inbound queues.
    Deliver(Vec<Channel>),
    /// Handled by the switchboard itself.
    Bus,
    /// Not routable from this source.
    Drop(&'static str),
}

/// Route `envelope` posted by `source`.
pub fn route(source: Channel, envelope: &Envelope) -> Route {
    use Channel::{Business, Interface, Network};

    match envelope.kind {
        Kind::CloseApp | Kind::GetAppInfo => Route::Bus,
        // Readiness reports go to the bus; explicit answers to a requester.
        Kind::SetSatInfo => match envelope.target {
            Some(target) => Route::Deliver(vec![target]),
            None => Route::Bus,
        },
        Kind::GetSatInfo | Kind::SetAppInfo | Kind::Shutdown => match envelope.target {
            Some(target) => Route::Deliver(vec![target]),
            None => Route::Drop("missing target channel"),
        },
        kind => match (source, kind) {
            (
                Business,
                Kind::Send
                | Kind::SetAddress
                | Kind::Connect
                | Kind::Disconnect
                | Kind::NetShutdown
                | Kind::CheckConn
                | Kind::GetNetInfo,
            ) => Route::Deliver(vec![Network]),
            (Business, Kind::SetBusInfo) => match envelope.target {
                Some(target @ (Network | Interface)) => Route::Deliver(vec![target]),
                Some(Business) => Route::Drop("business cannot address itself"),
                None => Route::Deliver(vec![Network, Interface]),
            },
            (
                Business,
                Kind::AskUserChoice | Kind::ShowContent | Kind::GetGuiInfo,
            ) => Route::Deliver(vec![Interface]),
            (
                Network,
                Kind::Receive
                | Kind::SetNetInfo
                | Kind::NetError
                | Kind::NetStatus
                | Kind::SendError
                | Kind::GetBusInfo,
            ) => Route::Deliver(vec![Business]),
            (
                Interface,
                Kind::GuiReady
                | Kind::ReturnUserChoice
                | Kind::SendUserCommand
                | Kind::SetGuiInfo
                | Kind::GetBusInfo,
            ) => Route::Deliver(vec![Business]),
            _ => Route::Drop("no route for kind from this channel"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Channel::{Business, Interface, Network};

    fn deliver(source: Channel, env: Envelope) -> Vec<Channel> {
        match route(source, &env) {
            Route::Deliver(to) => to,
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn test_business_to_network() {
        for kind in [
            Kind::Send,
            Kind::SetAddress,
            Kind::Connect,
            Kind::Disconnect,
            Kind::NetShutdown,
            Kind::CheckConn,
            Kind::GetNetInfo,
        ] {
            assert_eq!(deliver(Business, Envelope::new(kind)), vec![Network]);
        }
    }

    #[test]
    fn test_network_to_business() {
        for kind in [
            Kind::Receive,
            Kind::SetNetInfo,
            Kind::NetError,
            Kind::NetStatus,
            Kind::SendError,
            Kind::GetBusInfo,
        ] {
            assert_eq!(deliver(Network, Envelope::new(kind)), vec![Business]);
        }
    }

    #[test]
    fn test_interface_and_business_exchange() {
        assert_eq!(deliver(Business, Envelope::new(Kind::ShowContent)), vec![Interface]);
        assert_eq!(deliver(Interface, Envelope::new(Kind::GuiReady)), vec![Business]);
        assert_eq!(
            deliver(Interface, Envelope::new(Kind::SendUserCommand)),
            vec![Business]
        );
    }

    #[test]
    fn test_set_bus_info_fans_out_unless_targeted() {
        assert_eq!(
            deliver(Business, Envelope::new(Kind::SetBusInfo)),
            vec![Network, Interface]
        );
        assert_eq!(
            deliver(Business, Envelope::new(Kind::SetBusInfo).to(Interface)),
            vec![Interface]
        );
    }

    #[test]
    fn test_named_channel_kinds() {
        assert_eq!(
            deliver(Interface, Envelope::new(Kind::GetSatInfo).to(Network)),
            vec![Network]
        );
        assert_eq!(
            deliver(Business, Envelope::new(Kind::Shutdown).to(Interface)),
            vec![Interface]
        );
        assert!(matches!(
            route(Business, &Envelope::new(Kind::Shutdown)),
            Route::Drop(_)
        ));
    }

    #[test]
    fn test_bus_kinds() {
        assert_eq!(route(Interface, &Envelope::new(Kind::CloseApp)), Route::Bus);
        assert_eq!(route(Network, &Envelope::new(Kind::GetAppInfo)), Route::Bus);
        assert_eq!(route(Network, &Envelope::new(Kind::SetSatInfo)), Route::Bus);
    }

    #[test]
    fn test_wrong_direction_is_dropped() {
        assert!(matches!(
            route(Network, &Envelope::new(Kind::Send)),
            Route::Drop(_)
        ));
        assert!(matches!(
            route(Interface, &Envelope::new(Kind::Connect)),
            Route::Drop(_)
        ));
    }
}
