//! Device-side protocol driver for Linux USB gadgets.
//!
//! [`VbcFunction`] provides a custom USB gadget function with one vendor
//! interface and a bulk endpoint pair. A single task owns the protocol engine,
//! so bulk data, control requests and lifecycle events are handled strictly
//! one after another.

use bytes::{Bytes, BytesMut};
use futures::{future, FutureExt};
use std::{
    fmt,
    io::{Error, ErrorKind, Result},
};
use tokio::task::JoinSet;

use usb_gadget::function::{
    custom::{
        CtrlReceiver, CtrlSender, Custom, Endpoint, EndpointDirection, EndpointReceiver, EndpointSender, Event,
        Interface,
    },
    Handle,
};

use crate::{
    control::{ControlConfig, ControlDispatcher, ControlRequest, ControlStage},
    engine::{Engine, EngineConfig, LifecycleEvent},
    transport::{ControlTransport, TxFifo},
    Class, MAX_PACKET_SIZE,
};

/// Interface identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceId {
    class: Class,
    name: String,
}

impl InterfaceId {
    /// Creates a new interface identification using the specified USB interface class.
    pub fn new(class: Class) -> Self {
        Self { class, name: "vbc".to_string() }
    }

    /// Sets the USB interface name.
    pub fn with_name(mut self, name: impl AsRef<str>) -> Self {
        self.name = name.as_ref().to_string();
        self
    }

    /// Interface class.
    pub fn class(&self) -> Class {
        self.class
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Why the protocol driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The USB function was unbound from the gadget.
    Unbound,
    /// The host requested a reboot into programming mode.
    ///
    /// The application is expected to carry out the reboot.
    ProgrammingMode,
}

/// Vendor bulk command device-side function.
pub struct VbcFunction {
    id: InterfaceId,
    task: JoinSet<Result<Exit>>,
}

impl fmt::Debug for VbcFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VbcFunction").field("id", &self.id).finish()
    }
}

impl VbcFunction {
    /// Creates a new device-side function using the default protocol configuration.
    pub fn new(id: InterfaceId) -> (Self, Handle) {
        Self::with_config(id, EngineConfig::default(), ControlConfig::default())
    }

    /// Creates a new device-side function.
    ///
    /// The interface number in `control` must match the number the host sees
    /// for this interface, which is `0` when this is the only function of the
    /// gadget.
    pub fn with_config(id: InterfaceId, engine: EngineConfig, control: ControlConfig) -> (Self, Handle) {
        let (ep_rx, ep_rx_dir) = EndpointDirection::host_to_device();
        let (ep_tx, ep_tx_dir) = EndpointDirection::device_to_host();

        let (ep0, handle) = Custom::builder()
            .with_interface(
                Interface::new(id.class.into(), &id.name)
                    .with_endpoint(Endpoint::bulk(ep_rx_dir))
                    .with_endpoint(Endpoint::bulk(ep_tx_dir)),
            )
            .build();

        let driver = Driver {
            engine: Engine::new(engine),
            dispatcher: ControlDispatcher::new(control),
            fifo: TxFifo::default(),
            enabled: false,
        };

        let mut task = JoinSet::new();
        task.spawn(driver.run(ep0, ep_tx, ep_rx));

        (Self { id, task }, handle)
    }

    /// Interface identification.
    pub fn id(&self) -> &InterfaceId {
        &self.id
    }

    /// Waits until the protocol driver stops.
    pub async fn wait(&mut self) -> Result<Exit> {
        match self.task.join_next().await {
            Some(Ok(res)) => res,
            Some(Err(err)) => Err(err.into()),
            None => Err(Error::new(ErrorKind::BrokenPipe, "the protocol driver has already stopped")),
        }
    }
}

struct Driver {
    engine: Engine,
    dispatcher: ControlDispatcher,
    fifo: TxFifo,
    enabled: bool,
}

impl Driver {
    async fn run(mut self, mut ep0: Custom, mut ep_tx: EndpointSender, mut ep_rx: EndpointReceiver) -> Result<Exit> {
        ep0.status().bound().await?;
        tracing::debug!("function bound");

        loop {
            self.engine.poll(&mut self.fifo);

            let status = ep0.status();

            let tx_task = match self.fifo.peek_flushed().filter(|_| self.enabled) {
                Some(packet) => {
                    let len = packet.len();
                    #[cfg(feature = "trace-packets")]
                    tracing::trace!("bulk IN: {}", crate::hex(&packet));
                    ep_tx.send_async(packet).map(move |res| res.map(|()| len)).left_future()
                }
                None => future::pending().right_future(),
            };

            let rx_task = if self.enabled {
                ep_rx.recv_async(BytesMut::with_capacity(MAX_PACKET_SIZE)).left_future()
            } else {
                future::pending().right_future()
            };

            let event_task = async {
                ep0.wait_event().await?;
                ep0.event()
            };

            tokio::select! {
                () = status.unbound() => {
                    tracing::debug!("function unbound");
                    return Ok(Exit::Unbound);
                }
                res = tx_task => match res {
                    Ok(len) => self.fifo.consume(len),
                    Err(err) => {
                        tracing::warn!("send error: {err}");
                        self.disable(&mut ep_tx, &mut ep_rx)?;
                    }
                },
                res = rx_task => match res {
                    Ok(Some(data)) => {
                        self.engine.receive(&data, &mut self.fifo);
                    }
                    Ok(None) => (),
                    Err(err) => {
                        tracing::warn!("receive error: {err}");
                        self.disable(&mut ep_tx, &mut ep_rx)?;
                    }
                },
                res = event_task => {
                    if let Some(exit) = self.event(res?, &mut ep_tx, &mut ep_rx)? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    fn disable(&mut self, ep_tx: &mut EndpointSender, ep_rx: &mut EndpointReceiver) -> Result<()> {
        self.enabled = false;
        self.fifo.clear();
        ep_tx.cancel()?;
        ep_rx.cancel()?;
        Ok(())
    }

    fn event(
        &mut self, event: Event, ep_tx: &mut EndpointSender, ep_rx: &mut EndpointReceiver,
    ) -> Result<Option<Exit>> {
        match event {
            Event::Enable => {
                self.engine.lifecycle(LifecycleEvent::Mounted);
                self.fifo.clear();
                self.enabled = true;
            }
            Event::Disable => {
                self.engine.lifecycle(LifecycleEvent::Unmounted);
                self.disable(ep_tx, ep_rx)?;
            }
            Event::Suspend => {
                self.engine.lifecycle(LifecycleEvent::Suspended { remote_wakeup: false });
                self.fifo.clear();
            }
            Event::Resume => {
                self.engine.lifecycle(LifecycleEvent::Resumed);
                self.fifo.clear();
            }
            Event::SetupHostToDevice(req) => return self.setup(SetupRequest::Out(req)),
            Event::SetupDeviceToHost(req) => return self.setup(SetupRequest::In(req)),
            _ => (),
        }

        Ok(None)
    }

    fn setup(&mut self, req: SetupRequest) -> Result<Option<Exit>> {
        let ctrl_req = match &req {
            SetupRequest::Out(req) => req.ctrl_req(),
            SetupRequest::In(req) => req.ctrl_req(),
        };
        let request = ControlRequest::from_parts(
            ctrl_req.request_type,
            ctrl_req.request,
            ctrl_req.value,
            ctrl_req.index,
            ctrl_req.length,
        );

        let mut transport = Ep0 { req: Some(req), fifo: &mut self.fifo, programming_mode: false };
        let completed = self.dispatcher.handle(&mut self.engine, ControlStage::Setup, &request, &mut transport);

        if transport.programming_mode {
            tracing::info!("leaving protocol for programming mode");
            return Ok(Some(Exit::ProgrammingMode));
        }

        if !completed {
            match transport.req.take() {
                Some(SetupRequest::Out(req)) => req.halt()?,
                Some(SetupRequest::In(req)) => req.halt()?,
                None => (),
            }
        }

        Ok(None)
    }
}

/// Setup request pending on endpoint 0.
enum SetupRequest<'a> {
    Out(CtrlReceiver<'a>),
    In(CtrlSender<'a>),
}

/// Answers a single setup request on endpoint 0.
struct Ep0<'a, 'f> {
    req: Option<SetupRequest<'a>>,
    fifo: &'f mut TxFifo,
    programming_mode: bool,
}

impl ControlTransport for Ep0<'_, '_> {
    fn send_control_response(&mut self, data: Bytes) -> bool {
        let res = match self.req.take() {
            Some(SetupRequest::Out(req)) => req.recv_all().map(|_| ()),
            Some(SetupRequest::In(req)) => req.send(&data).map(|_| ()),
            None => return false,
        };

        match res {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("control transfer error: {err}");
                false
            }
        }
    }

    fn discard_bulk(&mut self) {
        self.fifo.clear();
    }

    fn reboot_into_programming_mode(&mut self) {
        self.programming_mode = true;
    }
}
