//! Hand-written client-side mirrors of the daemon's D-Bus interfaces
//! (`net.reactivated.Fprint.Manager` / `.Device`). Kept separate from the
//! `fprintd` crate so this binary only depends on the wire contract, not
//! the daemon's internals.

use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

#[proxy(
    interface = "net.reactivated.Fprint.Manager",
    default_service = "net.reactivated.Fprint",
    default_path = "/net/reactivated/Fprint/Manager"
)]
pub trait Manager {
    #[zbus(name = "GetDevices")]
    fn get_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    #[zbus(name = "GetDefaultDevice")]
    fn get_default_device(&self) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(interface = "net.reactivated.Fprint.Device", default_service = "net.reactivated.Fprint")]
pub trait Device {
    fn claim(&self, username: &str) -> zbus::Result<()>;
    fn release(&self) -> zbus::Result<()>;

    #[zbus(name = "VerifyStart")]
    fn verify_start(&self, finger_name: &str) -> zbus::Result<()>;

    #[zbus(name = "VerifyStop")]
    fn verify_stop(&self) -> zbus::Result<()>;

    #[zbus(name = "ListEnrolledFingers")]
    fn list_enrolled_fingers(&self, username: &str) -> zbus::Result<Vec<String>>;

    #[zbus(signal, name = "VerifyStatus")]
    fn verify_status(&self, result: String, done: bool) -> zbus::Result<()>;

    #[zbus(signal, name = "VerifyFingerSelected")]
    fn verify_finger_selected(&self, finger: String) -> zbus::Result<()>;

    #[zbus(property, name = "name")]
    fn name(&self) -> zbus::Result<String>;
}
