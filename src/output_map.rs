//! Output maps.
//!
//! An output map ties the aspects of one domain object (a signal's
//! aspects, a turnout's positions) to what must be sent to the hardware
//! for each of them. It holds the interface, the channel on that
//! interface, and either a list of addresses or one object id. Every item
//! carries one action per address, or a single state action on object id
//! channels.
//!
//! Changing the interface or channel reconciles the rest: addresses that
//! still fit are kept together with their actions, otherwise exactly one
//! unused address is allocated and the actions start over.
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use rs_trackside::hal::MockOutputController;
//! use rs_trackside::output_map::{OutputAction, OutputMap, PairAction};
//! use rs_trackside::protocol::marklin_can::MarklinCan;
//! use rs_trackside::traits::OutputChannel;
//!
//! let cs2 = Rc::new(RefCell::new(MockOutputController::for_protocol::<MarklinCan>()));
//! let mut map = OutputMap::new(["stop", "proceed"]);
//!
//! map.set_interface(Some(cs2)).unwrap();
//! assert_eq!(map.channel(), Some(OutputChannel::AccessoryMotorola));
//! assert_eq!(map.addresses(), &[1]);
//!
//! map.set_action(&"proceed", 0, OutputAction::Pair(PairAction::Second)).unwrap();
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::error::OutputMapError;
use crate::traits::{OutputChannel, OutputController};

/// Which output of an accessory pair to activate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PairAction {
    /// Leave the pair alone.
    #[default]
    None,
    /// First output (position 0, red/round).
    First,
    /// Second output (position 1, green/straight).
    Second,
}

/// What to do with a single output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SingleAction {
    /// Leave the output alone.
    #[default]
    None,
    /// Switch off.
    Off,
    /// Switch on.
    On,
    /// Pulse on, then off.
    Pulse,
}

/// One action of a map item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputAction {
    /// Accessory pair at the address with the same index.
    Pair(PairAction),
    /// Plain output at the address with the same index.
    Single(SingleAction),
    /// State value for the mapped object.
    ObjectState(u8),
}

impl OutputAction {
    /// Unassigned action for `channel`.
    pub const fn default_for(channel: OutputChannel) -> Self {
        if channel.uses_object_id() {
            OutputAction::ObjectState(0)
        } else if channel.is_accessory() {
            OutputAction::Pair(PairAction::None)
        } else {
            OutputAction::Single(SingleAction::None)
        }
    }

    /// True if this kind of action fits `channel`.
    pub const fn fits(&self, channel: OutputChannel) -> bool {
        matches!(
            (self, channel.uses_object_id(), channel.is_accessory()),
            (OutputAction::ObjectState(_), true, _)
                | (OutputAction::Pair(_), false, true)
                | (OutputAction::Single(_), false, false)
        )
    }
}

/// Actions for one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputMapItem<K> {
    key: K,
    actions: Vec<OutputAction>,
}

impl<K> OutputMapItem<K> {
    /// Key of this item.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// One action per mapped address, or one state action.
    pub fn actions(&self) -> &[OutputAction] {
        &self.actions
    }
}

/// Shared handle to an interface's output side.
pub type OutputInterface = Rc<RefCell<dyn OutputController>>;

/// Mapping from keys to output actions on one interface.
pub struct OutputMap<K> {
    items: Vec<OutputMapItem<K>>,
    interface: Option<OutputInterface>,
    channel: Option<OutputChannel>,
    addresses: Vec<u32>,
    object_id: u32,
}

impl<K: PartialEq> OutputMap<K> {
    /// Map with one item per key and no interface.
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            items: keys
                .into_iter()
                .map(|key| OutputMapItem {
                    key,
                    actions: Vec::new(),
                })
                .collect(),
            interface: None,
            channel: None,
            addresses: Vec::new(),
            object_id: 0,
        }
    }

    /// Items in key order.
    pub fn items(&self) -> &[OutputMapItem<K>] {
        &self.items
    }

    /// Item for `key`.
    pub fn item(&self, key: &K) -> Option<&OutputMapItem<K>> {
        self.items.iter().find(|item| item.key == *key)
    }

    /// True with an interface assigned.
    pub fn has_interface(&self) -> bool {
        self.interface.is_some()
    }

    /// Selected channel.
    pub fn channel(&self) -> Option<OutputChannel> {
        self.channel
    }

    /// Mapped addresses; empty on object id channels.
    pub fn addresses(&self) -> &[u32] {
        &self.addresses
    }

    /// Mapped object id; 0 when none is selected.
    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    /// Assign or clear the interface.
    ///
    /// The current channel is kept when the new interface has it, otherwise
    /// its first accessory channel (or first channel) is selected.
    pub fn set_interface(&mut self, interface: Option<OutputInterface>) -> Result<(), OutputMapError> {
        let Some(interface) = interface else {
            self.interface = None;
            self.channel = None;
            self.addresses.clear();
            self.object_id = 0;
            self.set_all_actions(Vec::new());
            return Ok(());
        };

        let channel = {
            let controller = interface.borrow();
            let channels = controller.output_channels();
            match self.channel {
                Some(current) if channels.contains(&current) => current,
                _ => channels
                    .iter()
                    .copied()
                    .find(|c| c.is_accessory())
                    .or_else(|| channels.first().copied())
                    .ok_or(OutputMapError::NoInterface)?,
            }
        };
        self.reconcile(&interface, channel)?;
        self.interface = Some(interface);
        Ok(())
    }

    /// Select another channel of the assigned interface.
    pub fn set_channel(&mut self, channel: OutputChannel) -> Result<(), OutputMapError> {
        let interface = self.interface.clone().ok_or(OutputMapError::NoInterface)?;
        if !interface.borrow().output_channels().contains(&channel) {
            return Err(OutputMapError::UnsupportedChannel(channel));
        }
        if self.channel == Some(channel) {
            return Ok(());
        }
        self.reconcile(&interface, channel)
    }

    /// Map the next unused address and return it. Every item gains an
    /// unassigned action for it.
    pub fn add_address(&mut self) -> Result<u32, OutputMapError> {
        let (interface, channel) = self.address_channel()?;
        let controller = interface.borrow();
        let (min, max) = controller
            .output_address_min_max(channel)
            .ok_or(OutputMapError::UnsupportedChannel(channel))?;
        let usable = |a: &u32| {
            !self.addresses.contains(a) && controller.is_output_address_available(channel, *a)
        };
        let after_last = self.addresses.last().map_or(min, |last| last.saturating_add(1));
        let address = (after_last..=max)
            .chain(min..after_last.min(max.saturating_add(1)))
            .find(usable)
            .ok_or(OutputMapError::NoFreeAddress)?;
        drop(controller);

        self.addresses.push(address);
        let action = OutputAction::default_for(channel);
        for item in &mut self.items {
            item.actions.push(action);
        }
        debug!("mapped {:?} address {}", channel, address);
        Ok(address)
    }

    /// Unmap `address` and drop its action column.
    pub fn remove_address(&mut self, address: u32) -> Result<(), OutputMapError> {
        self.address_channel()?;
        let index = self
            .addresses
            .iter()
            .position(|a| *a == address)
            .ok_or(OutputMapError::UnknownAddress(address))?;
        if self.addresses.len() == 1 {
            return Err(OutputMapError::LastAddress);
        }
        self.addresses.remove(index);
        for item in &mut self.items {
            if index < item.actions.len() {
                item.actions.remove(index);
            }
        }
        Ok(())
    }

    /// Change the address at `index`, keeping its actions.
    pub fn set_address(&mut self, index: usize, address: u32) -> Result<(), OutputMapError> {
        let (interface, channel) = self.address_channel()?;
        if index >= self.addresses.len() {
            return Err(OutputMapError::NoSuchAction);
        }
        if self.addresses[index] == address {
            return Ok(());
        }
        if self.addresses.contains(&address) {
            return Err(OutputMapError::DuplicateAddress(address));
        }
        let (min, max) = interface
            .borrow()
            .output_address_min_max(channel)
            .ok_or(OutputMapError::UnsupportedChannel(channel))?;
        if !(min..=max).contains(&address) {
            return Err(OutputMapError::AddressOutOfRange { address, min, max });
        }
        self.addresses[index] = address;
        Ok(())
    }

    /// Select the object on an object id channel; 0 clears it. Items get a
    /// single state action while an object is selected.
    pub fn set_object_id(&mut self, id: u32) -> Result<(), OutputMapError> {
        let interface = self.interface.clone().ok_or(OutputMapError::NoInterface)?;
        let channel = self.channel.ok_or(OutputMapError::NoInterface)?;
        if !channel.uses_object_id() {
            return Err(OutputMapError::AddressChannel);
        }
        if id != 0 && !interface.borrow().is_output_id(channel, id) {
            return Err(OutputMapError::UnknownObject(id));
        }
        self.object_id = id;
        let actions = if id == 0 {
            Vec::new()
        } else {
            vec![OutputAction::ObjectState(0)]
        };
        self.set_all_actions(actions);
        Ok(())
    }

    /// Set the action at `index` of the item for `key`.
    pub fn set_action(&mut self, key: &K, index: usize, action: OutputAction) -> Result<(), OutputMapError> {
        let channel = self.channel.ok_or(OutputMapError::NoInterface)?;
        if !action.fits(channel) {
            return Err(OutputMapError::ActionMismatch);
        }
        let slot = self
            .items
            .iter_mut()
            .find(|item| item.key == *key)
            .and_then(|item| item.actions.get_mut(index))
            .ok_or(OutputMapError::NoSuchAction)?;
        *slot = action;
        Ok(())
    }

    fn address_channel(&self) -> Result<(OutputInterface, OutputChannel), OutputMapError> {
        let interface = self.interface.clone().ok_or(OutputMapError::NoInterface)?;
        let channel = self.channel.ok_or(OutputMapError::NoInterface)?;
        if channel.uses_object_id() {
            return Err(OutputMapError::ObjectChannel);
        }
        Ok((interface, channel))
    }

    fn set_all_actions(&mut self, actions: Vec<OutputAction>) {
        for item in &mut self.items {
            item.actions = actions.clone();
        }
    }

    /// Bring addresses, object id and actions in line with `channel` on
    /// `interface`. Nothing changes on error.
    fn reconcile(&mut self, interface: &OutputInterface, channel: OutputChannel) -> Result<(), OutputMapError> {
        if channel.uses_object_id() {
            self.channel = Some(channel);
            self.addresses.clear();
            self.object_id = 0;
            self.set_all_actions(Vec::new());
            return Ok(());
        }

        let controller = interface.borrow();
        let (min, max) = controller
            .output_address_min_max(channel)
            .ok_or(OutputMapError::UnsupportedChannel(channel))?;
        let keep = !self.addresses.is_empty()
            && self.addresses.iter().all(|a| (min..=max).contains(a));

        if keep {
            drop(controller);
            let default = OutputAction::default_for(channel);
            let width = self.addresses.len();
            for item in &mut self.items {
                if item.actions.len() != width || item.actions.iter().any(|a| !a.fits(channel)) {
                    item.actions = vec![default; width];
                }
            }
        } else {
            let address = controller
                .get_unused_output_address(channel)
                .ok_or(OutputMapError::NoFreeAddress)?;
            drop(controller);
            self.addresses = vec![address];
            self.set_all_actions(vec![OutputAction::default_for(channel)]);
        }
        self.channel = Some(channel);
        self.object_id = 0;
        debug!("output map on {:?}, addresses {:?}", channel, self.addresses);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockOutputController;
    use crate::protocol::diy::Diy;
    use crate::protocol::marklin_can::MarklinCan;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Position {
        Straight,
        Left,
    }

    fn cs2() -> OutputInterface {
        Rc::new(RefCell::new(MockOutputController::for_protocol::<MarklinCan>()))
    }

    fn turnout() -> OutputMap<Position> {
        OutputMap::new([Position::Straight, Position::Left])
    }

    #[test]
    fn unassigned_map_is_empty() {
        let mut map = turnout();
        assert!(!map.has_interface());
        assert_eq!(map.channel(), None);
        assert!(map.items().iter().all(|i| i.actions().is_empty()));
        assert_eq!(map.add_address(), Err(OutputMapError::NoInterface));
        assert_eq!(
            map.set_channel(OutputChannel::AccessoryDcc),
            Err(OutputMapError::NoInterface)
        );
    }

    #[test]
    fn plain_output_channel_gets_single_actions() {
        let diy: OutputInterface = Rc::new(RefCell::new(MockOutputController::for_protocol::<Diy>()));
        let mut map = turnout();
        map.set_interface(Some(diy)).unwrap();
        assert_eq!(map.channel(), Some(OutputChannel::Output));
        assert_eq!(
            map.item(&Position::Left).unwrap().actions(),
            &[OutputAction::Single(SingleAction::None)]
        );
        assert_eq!(
            map.set_action(&Position::Left, 0, OutputAction::Pair(PairAction::First)),
            Err(OutputMapError::ActionMismatch)
        );
    }

    #[test]
    fn claimed_addresses_are_skipped() {
        let controller = MockOutputController::for_protocol::<MarklinCan>()
            .with_addresses(OutputChannel::AccessoryMotorola, &[1, 2]);
        let mut map = turnout();
        map.set_interface(Some(Rc::new(RefCell::new(controller)))).unwrap();
        assert_eq!(map.addresses(), &[3]);
        assert_eq!(map.add_address(), Ok(4));
    }

    #[test]
    fn set_address_rejects_duplicates_and_range() {
        let mut map = turnout();
        map.set_interface(Some(cs2())).unwrap();
        map.add_address().unwrap();
        assert_eq!(map.addresses(), &[1, 2]);
        assert_eq!(map.set_address(1, 1), Err(OutputMapError::DuplicateAddress(1)));
        assert_eq!(
            map.set_address(1, 3000),
            Err(OutputMapError::AddressOutOfRange {
                address: 3000,
                min: 1,
                max: 2048
            })
        );
        map.set_address(0, 42).unwrap();
        assert_eq!(map.addresses(), &[42, 2]);
    }

    #[test]
    fn remove_address_drops_action_column() {
        let mut map = turnout();
        map.set_interface(Some(cs2())).unwrap();
        map.add_address().unwrap();
        map.set_action(&Position::Left, 1, OutputAction::Pair(PairAction::Second))
            .unwrap();
        map.remove_address(1).unwrap();
        assert_eq!(map.addresses(), &[2]);
        assert_eq!(
            map.item(&Position::Left).unwrap().actions(),
            &[OutputAction::Pair(PairAction::Second)]
        );
        assert_eq!(map.remove_address(2), Err(OutputMapError::LastAddress));
        assert_eq!(map.remove_address(9), Err(OutputMapError::UnknownAddress(9)));
    }

    #[test]
    fn object_id_must_exist() {
        let controller = MockOutputController::for_protocol::<MarklinCan>()
            .with_object_channel(OutputChannel::EcosObject, &[20000]);
        let mut map = turnout();
        map.set_interface(Some(Rc::new(RefCell::new(controller)))).unwrap();
        assert_eq!(map.set_object_id(20000), Err(OutputMapError::AddressChannel));
        map.set_channel(OutputChannel::EcosObject).unwrap();
        assert_eq!(map.set_object_id(1), Err(OutputMapError::UnknownObject(1)));
        assert_eq!(map.add_address(), Err(OutputMapError::ObjectChannel));
        map.set_object_id(20000).unwrap();
        map.set_object_id(0).unwrap();
        assert!(map.items().iter().all(|i| i.actions().is_empty()));
    }

    #[test]
    fn clearing_interface_resets() {
        let mut map = turnout();
        map.set_interface(Some(cs2())).unwrap();
        map.set_interface(None).unwrap();
        assert_eq!(map.channel(), None);
        assert!(map.addresses().is_empty());
        assert!(map.items().iter().all(|i| i.actions().is_empty()));
    }
}
