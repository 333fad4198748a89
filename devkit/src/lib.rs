/*!
# Maat DevKit - Doubles de test et utilitaires

Bibliothèque facilitant les tests des composants Maat avec:
- Sources de processus et de métriques hôte factices
- Agents de monitoring prêts à l'emploi
- Initialisation du logging pour tests
*/

pub mod fake_sources;
pub mod test_utils;

pub use fake_sources::{FakeHostSource, FakeProcessSource};
pub use test_utils::{init_tracing, test_config, AgentFixture};
