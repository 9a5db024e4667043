use dfi_shared::Address;
use rusqlite::params;

use crate::error::Result;
use crate::netdb::NetDb;

impl NetDb {
    /// Record that `seed` seeds content for `for_addr`. Both must already be
    /// stored; re-inserting an existing pair keeps a single edge.
    pub fn insert_seed(&self, for_addr: &Address, seed: &Address) -> Result<()> {
        let for_id = self.query_id(for_addr)?;
        let seed_id = self.query_id(seed)?;

        self.conn().execute(
            "INSERT INTO seed (seed, for_id) VALUES (?1, ?2)",
            params![seed_id, for_id],
        )?;
        Ok(())
    }

    /// Addresses that seed for `address`.
    pub fn query_seeds(&self, address: &Address) -> Result<Vec<Address>> {
        self.query_edges(
            "SELECT entry.address FROM entry
                 JOIN seed ON entry.id = seed.seed
             WHERE seed.for_id = (SELECT id FROM entry WHERE address = ?1)
             ORDER BY seed.id",
            address,
        )
    }

    /// Addresses that `address` seeds for.
    pub fn query_seeding(&self, address: &Address) -> Result<Vec<Address>> {
        self.query_edges(
            "SELECT entry.address FROM entry
                 JOIN seed ON entry.id = seed.for_id
             WHERE seed.seed = (SELECT id FROM entry WHERE address = ?1)
             ORDER BY seed.id",
            address,
        )
    }

    fn query_edges(&self, sql: &str, address: &Address) -> Result<Vec<Address>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![address.encode()], |row| row.get::<_, String>(0))?;

        let mut addresses = Vec::new();
        for row in rows {
            addresses.push(Address::decode(&row?)?);
        }
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::entry_named;
    use crate::StoreError;

    #[test]
    fn seed_edges_both_directions() {
        let db = NetDb::open_in_memory(Address::random()).unwrap();
        let (_, a) = entry_named("a");
        let (_, b) = entry_named("b");
        db.insert(&a).unwrap();
        db.insert(&b).unwrap();

        db.insert_seed(&a.address, &b.address).unwrap();
        db.insert_seed(&a.address, &b.address).unwrap();

        assert_eq!(db.query_seeds(&a.address).unwrap(), vec![b.address.clone()]);
        assert_eq!(db.query_seeding(&b.address).unwrap(), vec![a.address.clone()]);
        assert!(db.query_seeds(&b.address).unwrap().is_empty());
    }

    #[test]
    fn seed_requires_known_entries() {
        let db = NetDb::open_in_memory(Address::random()).unwrap();
        let (_, a) = entry_named("a");
        db.insert(&a).unwrap();

        assert!(matches!(
            db.insert_seed(&a.address, &Address::random()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn insert_links_listed_seeds() {
        let db = NetDb::open_in_memory(Address::random()).unwrap();
        let (_, seeder) = entry_named("seeder");
        db.insert(&seeder).unwrap();

        let (_, mut owner) = entry_named("owner");
        owner.seeds.push(seeder.address.clone());
        // seeds are unsigned, so the entry still verifies
        assert!(owner.verify().is_ok());
        db.insert(&owner).unwrap();

        assert_eq!(db.query_seeds(&owner.address).unwrap(), vec![seeder.address.clone()]);
        assert_eq!(db.query_seeding(&seeder.address).unwrap(), vec![owner.address]);
    }
}
